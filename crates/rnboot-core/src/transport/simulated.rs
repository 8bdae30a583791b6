//! In-memory RN2483 simulator.
//!
//! Behaves like a module on the other end of the serial line: in application
//! mode it answers the text commands, and after `sys eraseFW` it speaks the
//! binary bootloader protocol against a sparse flash model. Failures can be
//! injected per opcode and individual flash bytes can be corrupted on write.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, trace};

use super::traits::{ByteStream, TransportError};
use crate::protocol::{
    BOOTLOADER_KEY_ONE, BOOTLOADER_KEY_TWO, BOOTLOADER_MAGIC, BootCommand, BootVersionInfo, CodecError,
    CONFIG_ROW_ADDRESS, CONFIG_ROW_LENGTH, CONFIG_WORD_MASKS, MAX_ERASE_BLOCKS,
    Opcode, PacketHeader, STATUS_FAILED, STATUS_SUCCESS, TEXT_CMD_ERASE_FW, TEXT_CMD_GET_VERSION,
};

/// Version string the simulator reports in application mode.
pub const DEFAULT_APP_VERSION: &str = "RN2483 1.0.5 Oct 31 2018 15:06:52";

const ERASED: u8 = 0xFF;

/// Simulated module attached to a [`ByteStream`].
pub struct SimulatedBootloader {
    in_bootloader: bool,
    app_version: String,
    info: BootVersionInfo,
    flash: BTreeMap<u32, u8>,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    commands: Vec<BootCommand>,
    failing: HashSet<Opcode>,
    corrupt: HashSet<u32>,
    resets: usize,
}

impl SimulatedBootloader {
    /// A module running its application firmware.
    pub fn new() -> Self {
        Self {
            in_bootloader: false,
            app_version: DEFAULT_APP_VERSION.to_string(),
            info: BootVersionInfo {
                version: 0x0108,
                max_packet_size: 0x0100,
                ack_packet_size: 0x000D,
                device_id: 0x5C80,
                erase_row_size: 64,
                write_latch_size: 64,
                user_id: [0; 4],
            },
            flash: BTreeMap::new(),
            rx: Vec::new(),
            tx: VecDeque::new(),
            commands: Vec::new(),
            failing: HashSet::new(),
            corrupt: HashSet::new(),
            resets: 0,
        }
    }

    /// A module already waiting in its bootloader.
    pub fn in_bootloader() -> Self {
        Self {
            in_bootloader: true,
            ..Self::new()
        }
    }

    pub fn with_version_info(mut self, info: BootVersionInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_app_version(mut self, version: &str) -> Self {
        self.app_version = version.to_string();
        self
    }

    /// Make `opcode` fail: erase and write answer with a failure status,
    /// other commands go unanswered.
    pub fn inject_failure(&mut self, opcode: Opcode) {
        self.failing.insert(opcode);
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    /// Store the complement of whatever is written to `address`.
    pub fn corrupt_address(&mut self, address: u32) {
        self.corrupt.insert(address);
    }

    pub fn is_in_bootloader(&self) -> bool {
        self.in_bootloader
    }

    /// Every bootloader command received, in order.
    pub fn commands(&self) -> &[BootCommand] {
        &self.commands
    }

    pub fn reset_count(&self) -> usize {
        self.resets
    }

    pub fn flash_byte(&self, address: u32) -> u8 {
        self.flash.get(&address).copied().unwrap_or(ERASED)
    }

    pub fn read_flash(&self, address: u32, length: usize) -> Vec<u8> {
        (0..length as u32)
            .map(|i| self.flash_byte(address.wrapping_add(i)))
            .collect()
    }

    fn process(&mut self) {
        loop {
            let progressed = if self.in_bootloader {
                self.process_packet()
            } else {
                self.process_text_line()
            };
            if !progressed {
                break;
            }
        }
    }

    fn process_text_line(&mut self) -> bool {
        let Some(end) = self.rx.iter().position(|b| *b == b'\n') else {
            return false;
        };
        let line: Vec<u8> = self.rx.drain(..=end).collect();
        let command = String::from_utf8_lossy(&line);
        trace!(command = %command.trim_end(), "Simulator text command");

        if command == TEXT_CMD_GET_VERSION {
            let reply = format!("{}\r\n", self.app_version);
            self.tx.extend(reply.as_bytes());
        } else if command == TEXT_CMD_ERASE_FW {
            debug!("Simulator entering bootloader");
            self.flash.clear();
            self.in_bootloader = true;
        } else {
            self.tx.extend(b"invalid_param\r\n");
        }
        true
    }

    fn process_packet(&mut self) -> bool {
        if self.rx.is_empty() {
            return false;
        }
        if self.rx[0] != BOOTLOADER_MAGIC {
            self.rx.remove(0);
            return true;
        }
        let Ok(header) = PacketHeader::from_bytes(&self.rx) else {
            return false;
        };
        let Ok(opcode) = Opcode::from_u8(header.command) else {
            debug!(command = header.command, "Simulator dropping unknown command");
            self.rx.drain(..PacketHeader::SIZE);
            return true;
        };

        let payload_len = if opcode == Opcode::Write {
            header.length as usize
        } else {
            0
        };
        let total = PacketHeader::SIZE + payload_len;
        if self.rx.len() < total {
            return false;
        }
        let packet: Vec<u8> = self.rx.drain(..total).collect();
        let payload = &packet[PacketHeader::SIZE..];

        let command = match opcode {
            Opcode::GetVersion => BootCommand::GetVersion,
            Opcode::Write => BootCommand::Write {
                address: header.address,
                data: payload.to_vec(),
            },
            Opcode::Erase => BootCommand::Erase {
                address: header.address,
                block_count: header.length,
            },
            Opcode::Checksum => BootCommand::Checksum {
                address: header.address,
                length: header.length,
            },
            Opcode::Reset => BootCommand::Reset,
        };
        debug!(opcode = %opcode, address = %format!("0x{:06X}", header.address), "Simulator command");
        self.commands.push(command.clone());
        self.execute(&header, command);
        true
    }

    fn execute(&mut self, header: &PacketHeader, command: BootCommand) {
        match self.reply_to(header, command) {
            Ok(Some(reply)) => self.tx.extend(reply),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Simulator could not encode reply"),
        }
    }

    /// Apply `command` to the flash and build the reply, if one is sent.
    fn reply_to(
        &mut self,
        header: &PacketHeader,
        command: BootCommand,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        let opcode = command.opcode();
        let fail = self.failing.contains(&opcode);
        let keyed = header.key_one == BOOTLOADER_KEY_ONE && header.key_two == BOOTLOADER_KEY_TWO;

        let mut reply = header.to_bytes()?;
        match command {
            BootCommand::GetVersion => {
                if fail {
                    return Ok(None);
                }
                self.write_version(&mut reply)?;
            }
            BootCommand::Erase {
                address,
                block_count,
            } => {
                let ok = !fail && keyed;
                if ok {
                    let blocks = if block_count == 0 {
                        MAX_ERASE_BLOCKS
                    } else {
                        u32::from(block_count)
                    };
                    let end = address + blocks * u32::from(self.info.erase_row_size);
                    self.flash.retain(|a, _| !(address..end).contains(a));
                }
                reply.push(status_byte(ok));
            }
            BootCommand::Write { address, data } => {
                let ok = !fail && keyed;
                if ok {
                    for (i, byte) in data.iter().enumerate() {
                        self.store(address + i as u32, *byte);
                    }
                }
                reply.push(status_byte(ok));
            }
            BootCommand::Checksum { address, length } => {
                if fail {
                    return Ok(None);
                }
                let sum = self.device_checksum(address, length as usize);
                reply.write_u16::<LittleEndian>(sum)?;
            }
            BootCommand::Reset => {
                self.resets += 1;
                self.in_bootloader = false;
                return Ok(None);
            }
        }
        Ok(Some(reply))
    }

    fn write_version(&self, reply: &mut Vec<u8>) -> std::io::Result<()> {
        reply.write_u16::<LittleEndian>(self.info.version)?;
        reply.write_u16::<LittleEndian>(self.info.max_packet_size)?;
        reply.write_u16::<LittleEndian>(self.info.ack_packet_size)?;
        reply.write_u16::<LittleEndian>(self.info.device_id)?;
        reply.write_u16::<LittleEndian>(0)?;
        reply.push(self.info.erase_row_size);
        reply.push(self.info.write_latch_size);
        reply.extend_from_slice(&self.info.user_id);
        Ok(())
    }

    fn store(&mut self, address: u32, byte: u8) {
        let mut value = if self.corrupt.contains(&address) {
            !byte
        } else {
            byte
        };
        // Unimplemented configuration bits read back as zero.
        let offset = address.wrapping_sub(CONFIG_ROW_ADDRESS) as usize;
        if offset < CONFIG_ROW_LENGTH {
            value &= CONFIG_WORD_MASKS[offset / 2].to_le_bytes()[offset % 2];
        }
        self.flash.insert(address, value);
    }

    fn device_checksum(&self, address: u32, length: usize) -> u16 {
        crate::protocol::calc_checksum(&self.read_flash(address, length))
    }
}

impl Default for SimulatedBootloader {
    fn default() -> Self {
        Self::new()
    }
}

fn status_byte(ok: bool) -> u8 {
    if ok { STATUS_SUCCESS } else { STATUS_FAILED }
}

impl ByteStream for SimulatedBootloader {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.rx.extend_from_slice(data);
        self.process();
        Ok(data.len())
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if self.tx.is_empty() {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            });
        }
        let n = buf.len().min(self.tx.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.tx.clear();
        Ok(())
    }
}
