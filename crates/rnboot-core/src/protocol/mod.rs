//! Protocol module - RN2483 bootloader wire format.

pub mod checksum;
pub mod command;
pub mod constants;
pub mod header;
pub mod response;

pub use checksum::{CONFIG_WORD_MASKS, calc_checksum, calc_config_checksum};
pub use command::{BootCommand, Opcode};
pub use constants::*;
pub use header::{CodecError, PacketHeader};
pub use response::{
    BootResponse, BootStatus, BootVersionInfo, decode, decode_checksum, decode_status,
    decode_version,
};
