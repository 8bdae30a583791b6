//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow an update without
//! being tied to the core logic.

use std::fmt;

use crate::error::ErrorKind;
use crate::protocol::BootVersionInfo;
use crate::state::UpdateState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by an update session.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Firmware answered the version query.
    AppVersion(String),
    /// Phase changed.
    PhaseChanged { from: UpdateState, to: UpdateState },
    /// Bootloader capabilities received.
    VersionInfo(BootVersionInfo),
    /// One erase command acknowledged.
    EraseChunk {
        address: u32,
        blocks: u32,
        index: usize,
        total: usize,
    },
    /// A record finished writing or verifying.
    Progress {
        phase: UpdateState,
        completed: usize,
        total: usize,
    },
    /// Bytes sent to or received from the module.
    Packet {
        direction: PacketDirection,
        packet_type: String,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// The session failed.
    Failed {
        phase: UpdateState,
        kind: ErrorKind,
        message: String,
    },
    /// Update finished.
    Complete,
}

/// Serial traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Module
    Rx, // Module -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving update events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait UpdateObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &UpdateEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::AppVersion(version) => {
                tracing::info!(version = %version, "Firmware version");
            }
            UpdateEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            UpdateEvent::VersionInfo(info) => {
                tracing::info!(
                    version = %format!("0x{:04X}", info.version),
                    device_id = %format!("0x{:04X}", info.device_id),
                    erase_row = info.erase_row_size,
                    write_latch = info.write_latch_size,
                    "Bootloader info"
                );
            }
            UpdateEvent::EraseChunk {
                address,
                blocks,
                index,
                total,
            } => {
                tracing::debug!(
                    address = %format!("0x{:06X}", address),
                    blocks = blocks,
                    chunk = %format!("{}/{}", index + 1, total),
                    "Erased"
                );
            }
            UpdateEvent::Progress {
                phase,
                completed,
                total,
            } => {
                tracing::debug!(phase = %phase, progress = %format!("{}/{}", completed, total), "Progress");
            }
            UpdateEvent::Packet {
                direction,
                packet_type,
                length,
                ..
            } => {
                tracing::trace!(
                    dir = %direction,
                    type_ = %packet_type,
                    len = length,
                    "Serial packet"
                );
            }
            UpdateEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            UpdateEvent::Failed {
                phase,
                kind,
                message,
            } => {
                tracing::error!(phase = %phase, kind = %kind, "Update failed: {}", message);
            }
            UpdateEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}
