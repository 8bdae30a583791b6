//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod simulated;
pub mod traits;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use simulated::SimulatedBootloader;
pub use traits::{ByteStream, TransportError};
