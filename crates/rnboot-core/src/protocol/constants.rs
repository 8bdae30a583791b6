//! Protocol constants for the RN2483 UART bootloader.
//!
//! The bootloader runs on the module's PIC18LF46K22 and speaks a fixed
//! 10-byte little-endian header protocol.

// ============================================================================
// Packet Framing
// ============================================================================

/// Magic value for auto-baud, first byte of every packet.
pub const BOOTLOADER_MAGIC: u8 = 0x55;

/// First key value (write and erase commands only).
pub const BOOTLOADER_KEY_ONE: u8 = 0x55;

/// Second key value (write and erase commands only).
pub const BOOTLOADER_KEY_TWO: u8 = 0xAA;

/// Maximum value for the length field of a command.
pub const BOOTLOADER_MAX_LENGTH: u16 = 0xFF;

/// Header size: magic, command, length (2), key1, key2, address (4).
pub const HEADER_SIZE: usize = 10;

// ============================================================================
// Command Opcodes
// ============================================================================

pub const CMD_GET_VERSION: u8 = 0x00;
pub const CMD_WRITE: u8 = 0x02;
pub const CMD_ERASE: u8 = 0x03;
pub const CMD_CHECKSUM: u8 = 0x08;
pub const CMD_RESET: u8 = 0x09;

// ============================================================================
// Status Codes
// ============================================================================

pub const STATUS_FAILED: u8 = 0;
pub const STATUS_SUCCESS: u8 = 1;

// ============================================================================
// Response Sizes
// ============================================================================

/// Echoed header + version, max packet, ack packet, device id, reserved
/// (5x u16) + erase row, write latch, 4 user id bytes.
pub const VERSION_RESPONSE_SIZE: usize = HEADER_SIZE + 16;

/// Echoed header + status byte.
pub const STATUS_RESPONSE_SIZE: usize = HEADER_SIZE + 1;

/// Echoed header + u16 checksum.
pub const CHECKSUM_RESPONSE_SIZE: usize = HEADER_SIZE + 2;

// ============================================================================
// Erase Chunking
// ============================================================================

/// Maximum rows per erase command. Encoded on the wire as 0.
pub const MAX_ERASE_BLOCKS: u32 = 256;

// ============================================================================
// Memory Map
// ============================================================================

/// Start of application flash (the bootloader lives below this).
pub const APP_FLASH_START: u32 = 0x300;

/// End of application flash (exclusive).
pub const APP_FLASH_END: u32 = 0x10000;

/// Configuration row base address.
pub const CONFIG_ROW_ADDRESS: u32 = 0x30_0000;

/// Configuration row length in bytes (CONFIG1..CONFIG7, 2 bytes each).
pub const CONFIG_ROW_LENGTH: usize = 14;

// ============================================================================
// Text Mode (firmware command interface)
// ============================================================================

/// Baud rate used by the module firmware out of reset.
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Baud rates the module's UART supports.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 115200, 230400];

pub const TEXT_CMD_GET_VERSION: &str = "sys get ver\r\n";
pub const TEXT_CMD_ERASE_FW: &str = "sys eraseFW\r\n";

/// Longest version line accepted from the firmware.
pub const MAX_TEXT_RESPONSE: usize = 64;

/// Default timeout for text-mode responses.
pub const TEXT_TIMEOUT_MS: u64 = 1000;

/// Time the module needs to reset between firmware and bootloader.
pub const RESET_WAIT_MS: u64 = 500;
