//! Payload handling module.
//!
//! Parses Intel HEX images and plans how their records map onto bootloader
//! write and erase commands.

pub mod chunks;
pub mod hex;

pub use chunks::{ChunkState, EraseChunk, ErasePlan, WriteChunks};
pub use hex::{HexFile, HexParser, HexRecord, ParseError, RecordType, StartAddress};
