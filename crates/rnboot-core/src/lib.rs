//! rnboot-core: firmware updater for Microchip RN2483 LoRa modules.
//!
//! This crate parses Intel HEX firmware images and drives the module's UART
//! bootloader through a complete erase, write, verify and reset cycle.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Payload**: Intel HEX parsing and chunk planning
//! - **Protocol**: Bootloader constants, packet codec and checksums
//! - **Transport**: Byte-stream abstraction (serial port, mock, simulator)
//! - **Client / Handshake**: Binary bootloader and text-mode commands
//! - **State**: Update state machine and phase handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use rnboot_core::{HexFile, SerialTransport, SessionConfig, UpdateSession};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SessionConfig::default();
//! let hex = HexFile::load("RN2483_Parser.production.unified.hex")?;
//! let port = SerialTransport::open("/dev/ttyUSB0", config.baud_rate)?;
//!
//! let mut session = UpdateSession::new(port, config);
//! session.query_app_version()?;
//! session.erase_and_enter_bootloader()?;
//! session.wait_for_reset();
//! session.run_update(&hex)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handshake;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use client::{BootloaderClient, ProtocolError};
pub use config::SessionConfig;
pub use error::{DeviceError, ErrorKind, UpdateError};
pub use events::{LogLevel, NullObserver, TracingObserver, UpdateEvent, UpdateObserver};
pub use handshake::TextConsole;
pub use payload::{HexFile, HexRecord, ParseError};
pub use protocol::{BootCommand, BootResponse, BootVersionInfo, calc_checksum, calc_config_checksum};
pub use session::UpdateSession;
pub use state::{Progress, UpdateState};
pub use transport::{
    ByteStream, MockTransport, SerialTransport, SimulatedBootloader, TransportError,
};
