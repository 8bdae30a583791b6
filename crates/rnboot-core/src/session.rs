//! Update session - high-level orchestrator for a firmware update.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, instrument};

use crate::client::BootloaderClient;
use crate::config::SessionConfig;
use crate::error::UpdateError;
use crate::events::{PacketDirection, TracingObserver, UpdateEvent, UpdateObserver};
use crate::handshake::TextConsole;
use crate::payload::HexFile;
use crate::protocol::{BOOTLOADER_MAGIC, BootVersionInfo, Opcode, PacketHeader};
use crate::state::handlers::{HandlerContext, run_phases};
use crate::state::machine::{Progress, UpdateContext, UpdateState};
use crate::transport::{ByteStream, TransportError};

/// Update session - owns the stream to one module for its lifetime.
pub struct UpdateSession<T: ByteStream, O: UpdateObserver> {
    stream: T,
    config: SessionConfig,
    observer: Arc<O>,
    context: UpdateContext,
}

impl<T: ByteStream> UpdateSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(stream: T, config: SessionConfig) -> Self {
        Self::with_observer(stream, config, Arc::new(TracingObserver))
    }
}

impl<T: ByteStream, O: UpdateObserver> UpdateSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(stream: T, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            stream,
            config,
            observer,
            context: UpdateContext::new(),
        }
    }

    /// Version string of the running application firmware.
    #[instrument(skip(self))]
    pub fn query_app_version(&mut self) -> Result<String, UpdateError> {
        let timeout = self.config.handshake_timeout();
        let stream = ObservableStream::new(&mut self.stream, self.observer.as_ref());
        let version = TextConsole::new(stream).get_version(timeout)?;
        self.observer
            .on_event(&UpdateEvent::AppVersion(version.clone()));
        Ok(version)
    }

    /// Erase the application firmware so the module boots into its
    /// bootloader. Call [`wait_for_reset`](Self::wait_for_reset) before
    /// starting the update.
    #[instrument(skip(self))]
    pub fn erase_and_enter_bootloader(&mut self) -> Result<(), UpdateError> {
        let stream = ObservableStream::new(&mut self.stream, self.observer.as_ref());
        TextConsole::new(stream).erase_firmware()?;
        info!("Firmware erased, module entering bootloader");
        Ok(())
    }

    /// Give the module time to restart.
    pub fn wait_for_reset(&self) {
        thread::sleep(self.config.reset_wait());
    }

    /// Query, erase, write, verify and reset.
    #[instrument(skip_all, fields(records = hex.num_records()))]
    pub fn run_update(&mut self, hex: &HexFile) -> Result<(), UpdateError> {
        self.run_from(UpdateState::QueryVersion, hex, false)
    }

    /// Write, verify and reset without erasing again. The version info from
    /// an earlier run is reused when present.
    #[instrument(skip_all, fields(records = hex.num_records()))]
    pub fn resume(&mut self, hex: &HexFile) -> Result<(), UpdateError> {
        let first = if self.context.version_info.is_some() {
            UpdateState::Writing
        } else {
            UpdateState::QueryVersion
        };
        self.run_from(first, hex, true)
    }

    fn run_from(
        &mut self,
        first: UpdateState,
        hex: &HexFile,
        resume: bool,
    ) -> Result<(), UpdateError> {
        let observer = self.observer.as_ref();
        let client = BootloaderClient::new(ObservableStream::new(&mut self.stream, observer))
            .with_response_timeout(self.config.response_timeout())
            .with_echo_check(self.config.verify_echo);

        let mut ctx = HandlerContext {
            client,
            observer,
            state: &mut self.context,
            config: &self.config,
            hex,
            resume,
        };
        run_phases(&mut ctx, first)
    }

    pub fn state(&self) -> UpdateState {
        self.context.state
    }

    /// Phase the last run failed in.
    pub fn failed_in(&self) -> Option<UpdateState> {
        self.context.failed_in
    }

    pub fn progress(&self) -> Progress {
        self.context.progress
    }

    pub fn version_info(&self) -> Option<BootVersionInfo> {
        self.context.version_info
    }

    /// Error from the final reset command, if it failed.
    pub fn reset_error(&self) -> Option<&str> {
        self.context.reset_error.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    pub fn into_transport(self) -> T {
        self.stream
    }
}

/// Stream wrapper that emits packet events.
struct ObservableStream<'a, T: ByteStream, O: UpdateObserver> {
    inner: &'a mut T,
    observer: &'a O,
}

impl<'a, T: ByteStream, O: UpdateObserver> ObservableStream<'a, T, O> {
    fn new(inner: &'a mut T, observer: &'a O) -> Self {
        Self { inner, observer }
    }
}

fn packet_type(data: &[u8]) -> String {
    if data.len() >= PacketHeader::SIZE && data[0] == BOOTLOADER_MAGIC {
        match Opcode::from_u8(data[1]) {
            Ok(opcode) => opcode.to_string(),
            Err(_) => "Data".to_string(),
        }
    } else if data.ends_with(b"\r\n") {
        "Text".to_string()
    } else {
        "Data".to_string()
    }
}

impl<'a, T: ByteStream, O: UpdateObserver> ByteStream for ObservableStream<'a, T, O> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.write(data);
        if let Ok(n) = &res {
            self.observer.on_event(&UpdateEvent::Packet {
                direction: PacketDirection::Tx,
                packet_type: packet_type(data),
                length: *n,
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let res = self.inner.read_timeout(buf, timeout);
        if let Ok(n) = res {
            if n > 0 {
                self.observer.on_event(&UpdateEvent::Packet {
                    direction: PacketDirection::Rx,
                    packet_type: "Data".to_string(),
                    length: n,
                    data: Some(buf[..n].iter().take(32).cloned().collect()),
                });
            }
        }
        res
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.inner.clear_input()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::NullObserver;
    use crate::handshake::tests::TricklingStream;
    use crate::payload::HexRecord;
    use crate::protocol::{
        BootCommand, CMD_CHECKSUM, CMD_ERASE, CMD_GET_VERSION, CMD_WRITE, CONFIG_ROW_ADDRESS,
        STATUS_SUCCESS, calc_checksum,
    };
    use crate::state::handlers::tests::RecordingObserver;
    use crate::transport::{MockTransport, SimulatedBootloader};
    use byteorder::{LittleEndian, WriteBytesExt};

    const SIXTEEN_BYTES: &str =
        ":10000000000102030405060708090A0B0C0D0E0F78\n:00000001FF\n";

    fn session<O: UpdateObserver>(
        sim: SimulatedBootloader,
        observer: Arc<O>,
    ) -> UpdateSession<SimulatedBootloader, O> {
        let config = SessionConfig {
            reset_wait_ms: 0,
            ..Default::default()
        };
        UpdateSession::with_observer(sim, config, observer)
    }

    fn echo(command: u8, length: u16, address: u32) -> Vec<u8> {
        PacketHeader::new(command, length, 0x55, 0xAA, address)
            .to_bytes()
            .unwrap()
    }

    fn version_reply(erase_row: u8, latch: u8) -> Vec<u8> {
        let mut reply = echo(CMD_GET_VERSION, 0, 0);
        for word in [0x0108u16, 0x0100, 0x000D, 0x5C80, 0] {
            reply.write_u16::<LittleEndian>(word).unwrap();
        }
        reply.extend_from_slice(&[erase_row, latch, 0, 0, 0, 0]);
        reply
    }

    fn status_reply(command: u8, length: u16, address: u32) -> Vec<u8> {
        let mut reply = echo(command, length, address);
        reply.push(STATUS_SUCCESS);
        reply
    }

    fn checksum_reply(length: u16, address: u32, sum: u16) -> Vec<u8> {
        let mut reply = echo(CMD_CHECKSUM, length, address);
        reply.write_u16::<LittleEndian>(sum).unwrap();
        reply
    }

    #[test]
    fn test_single_record_against_scripted_device() {
        let hex = HexFile::parse(SIXTEEN_BYTES).unwrap();
        assert_eq!(hex.num_records(), 1);
        assert_eq!(hex.records()[0].address(), 0);
        assert_eq!(hex.records()[0].len(), 16);

        let mock = MockTransport::new();
        mock.queue_response(&version_reply(64, 64));
        let plan = crate::payload::ErasePlan::new(0x300, 0x10000, 64);
        for chunk in &plan.chunks {
            let wire_count = if chunk.blocks == 256 { 0 } else { chunk.blocks as u16 };
            mock.queue_response(&status_reply(CMD_ERASE, wire_count, chunk.address));
        }
        mock.queue_response(&status_reply(CMD_WRITE, 16, 0));
        mock.queue_response(&checksum_reply(
            16,
            0,
            calc_checksum(hex.records()[0].data()),
        ));

        let observer = Arc::new(RecordingObserver::default());
        let config = SessionConfig {
            reset_wait_ms: 0,
            ..Default::default()
        };
        let mut session = UpdateSession::with_observer(mock.clone(), config, observer.clone());
        session.run_update(&hex).unwrap();

        assert_eq!(session.state(), UpdateState::Done);
        assert_eq!(observer.progress(UpdateState::Writing), [(1, 1)]);
        assert_eq!(observer.progress(UpdateState::Verifying), [(1, 1)]);
        assert_eq!(session.progress(), Progress { completed: 1, total: 1 });
        assert_eq!(mock.pending_responses(), 0);
        // The record at 0 is below the erase range.
        assert_eq!(observer.warnings().len(), 1);

        let writes = mock.get_writes();
        assert_eq!(writes.last().unwrap()[1], 0x09);
    }

    #[test]
    fn test_erase_257_rows() {
        let info = BootVersionInfo {
            erase_row_size: 64,
            write_latch_size: 64,
            ..Default::default()
        };
        let sim = SimulatedBootloader::in_bootloader().with_version_info(info);
        let mut session = session(sim, Arc::new(NullObserver));
        session.config.erase_start = 0x400;
        session.config.erase_end = 0x400 + 257 * 64;

        let hex = HexFile::parse(":00000001FF").unwrap();
        session.run_update(&hex).unwrap();

        let erases: Vec<_> = session
            .into_transport()
            .commands()
            .iter()
            .filter(|c| matches!(c, BootCommand::Erase { .. }))
            .cloned()
            .collect();
        assert_eq!(
            erases,
            [
                BootCommand::Erase {
                    address: 0x400,
                    block_count: 0
                },
                BootCommand::Erase {
                    address: 0x400 + 256 * 64,
                    block_count: 1
                },
            ]
        );
    }

    #[test]
    fn test_write_chunking_130_bytes() {
        let data: Vec<u8> = (0..130).map(|i| i as u8).collect();
        let hex = hex_from_records(&[HexRecord::new(0x1000, data.clone())]);

        let mut session = session(SimulatedBootloader::in_bootloader(), Arc::new(NullObserver));
        session.run_update(&hex).unwrap();
        let sim = session.into_transport();
        let writes: Vec<(u32, usize)> = sim
            .commands()
            .iter()
            .filter_map(|c| match c {
                BootCommand::Write { address, data } => Some((*address, data.len())),
                _ => None,
            })
            .collect();
        assert_eq!(writes, [(0x1000, 64), (0x1040, 64), (0x1080, 2)]);
        assert_eq!(sim.read_flash(0x1000, 130), data);
    }

    fn record_line(record: &HexRecord) -> String {
        let [hi, lo] = (record.address() as u16).to_be_bytes();
        let mut bytes = vec![record.len() as u8, hi, lo, 0x00];
        bytes.extend_from_slice(record.data());
        let sum = bytes.iter().fold(0u8, |s, b| s.wrapping_add(*b));
        bytes.push(sum.wrapping_neg());
        let body: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        format!(":{}\n", body)
    }

    fn hex_from_records(records: &[HexRecord]) -> HexFile {
        let mut text: String = records.iter().map(record_line).collect();
        text.push_str(":00000001FF\n");
        HexFile::parse(&text).unwrap()
    }

    #[test]
    fn test_full_flow_from_application_mode() {
        let hex = hex_from_records(&[
            HexRecord::new(0x300, vec![0x12; 40]),
            HexRecord::new(0x400, vec![0x34; 17]),
        ]);
        let mut session = session(SimulatedBootloader::new(), Arc::new(NullObserver));

        let before = session.query_app_version().unwrap();
        assert!(before.starts_with("RN2483"));
        session.erase_and_enter_bootloader().unwrap();
        session.wait_for_reset();
        session.run_update(&hex).unwrap();
        session.wait_for_reset();
        assert_eq!(session.query_app_version().unwrap(), before);

        assert_eq!(session.state(), UpdateState::Done);
        assert!(session.reset_error().is_none());
        let info = session.version_info().unwrap();
        assert_eq!(info.device_id, 0x5C80);
    }

    #[test]
    fn test_zero_timeouts_wait_for_slow_module() {
        let stream = TricklingStream::new(b"RN2483 1.0.5\r\n", Duration::from_millis(5));
        let config = SessionConfig {
            handshake_timeout_ms: 0,
            response_timeout_ms: Some(0),
            ..Default::default()
        };
        let mut session = UpdateSession::with_observer(stream, config, Arc::new(NullObserver));
        assert_eq!(session.query_app_version().unwrap(), "RN2483 1.0.5");
    }

    #[test]
    fn test_checksum_mismatch_fails_in_verify() {
        let mut sim = SimulatedBootloader::in_bootloader();
        sim.corrupt_address(0x405);
        let hex = hex_from_records(&[HexRecord::new(0x400, vec![0xA5; 16])]);
        let mut session = session(sim, Arc::new(NullObserver));

        let err = session.run_update(&hex).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_eq!(err.address(), Some(0x400));
        assert_eq!(session.state(), UpdateState::Failed);
        assert_eq!(session.failed_in(), Some(UpdateState::Verifying));
    }

    #[test]
    fn test_erase_failure() {
        let mut sim = SimulatedBootloader::in_bootloader();
        sim.inject_failure(Opcode::Erase);
        let mut session = session(sim, Arc::new(NullObserver));
        let hex = hex_from_records(&[HexRecord::new(0x400, vec![1])]);

        let err = session.run_update(&hex).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EraseFailed);
        assert_eq!(session.failed_in(), Some(UpdateState::Erasing));
        assert!(
            !session
                .into_transport()
                .commands()
                .iter()
                .any(|c| matches!(c, BootCommand::Write { .. }))
        );
    }

    #[test]
    fn test_version_timeout() {
        let mut sim = SimulatedBootloader::in_bootloader();
        sim.inject_failure(Opcode::GetVersion);
        let mut session = session(sim, Arc::new(NullObserver));
        let hex = hex_from_records(&[HexRecord::new(0x400, vec![1])]);

        let err = session.run_update(&hex).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolTimeout);
        assert_eq!(session.failed_in(), Some(UpdateState::QueryVersion));
    }

    #[test]
    fn test_zero_write_latch_rejected() {
        let info = BootVersionInfo {
            erase_row_size: 64,
            write_latch_size: 0,
            ..Default::default()
        };
        let sim = SimulatedBootloader::in_bootloader().with_version_info(info);
        let mut session = session(sim, Arc::new(NullObserver));
        let err = session
            .run_update(&hex_from_records(&[HexRecord::new(0x400, vec![1])]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
    }

    #[test]
    fn test_resume_after_write_failure() {
        let mut sim = SimulatedBootloader::in_bootloader();
        sim.inject_failure(Opcode::Write);
        let hex = hex_from_records(&[
            HexRecord::new(0x400, vec![0x11; 8]),
            HexRecord::new(0x500, vec![0x22; 8]),
        ]);
        let mut session = session(sim, Arc::new(NullObserver));
        assert!(session.run_update(&hex).is_err());
        assert_eq!(session.failed_in(), Some(UpdateState::Writing));

        session.transport_mut().clear_failures();
        session.resume(&hex).unwrap();
        assert_eq!(session.state(), UpdateState::Done);
        assert_eq!(session.failed_in(), None);

        let sim = session.into_transport();
        let erases = sim
            .commands()
            .iter()
            .filter(|c| matches!(c, BootCommand::Erase { .. }))
            .count();
        let versions = sim
            .commands()
            .iter()
            .filter(|c| matches!(c, BootCommand::GetVersion))
            .count();
        // Only the first run erased and queried the version. 1012 rows
        // take four erase commands.
        assert_eq!(versions, 1);
        assert_eq!(erases, 4);
        assert_eq!(sim.read_flash(0x500, 8), vec![0x22; 8]);
    }

    #[test]
    fn test_resume_without_version_queries_first() {
        let hex = hex_from_records(&[HexRecord::new(0x400, vec![0x11; 8])]);
        let mut session = session(SimulatedBootloader::in_bootloader(), Arc::new(NullObserver));
        session.resume(&hex).unwrap();
        let sim = session.into_transport();
        assert!(matches!(sim.commands()[0], BootCommand::GetVersion));
        assert!(
            !sim.commands()
                .iter()
                .any(|c| matches!(c, BootCommand::Erase { .. }))
        );
    }

    #[test]
    fn test_config_row_verified_with_masks() {
        let row = vec![
            0x00, 0x25, 0x1F, 0x3C, 0x00, 0xBF, 0x85, 0x00, 0x0F, 0xC0, 0x0F, 0xE0, 0x0F, 0x40,
        ];
        // Unimplemented bits set in the image read back as zero.
        let mut image_row = row.clone();
        image_row[0] = 0xFF;
        let mut text = String::from(":020000040030CA\n");
        text.push_str(&record_line(&HexRecord::new(0, image_row)));
        text.push_str(":00000001FF\n");
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.records()[0].address(), CONFIG_ROW_ADDRESS);

        let mut session = session(SimulatedBootloader::in_bootloader(), Arc::new(NullObserver));
        session.run_update(&hex).unwrap();
        let sim = session.into_transport();
        assert_eq!(sim.read_flash(CONFIG_ROW_ADDRESS, 14), row);
    }

    #[test]
    fn test_reset_failure_does_not_fail_session() {
        let hex = hex_from_records(&[HexRecord::new(0x400, vec![1, 2])]);
        let plan = crate::payload::ErasePlan::new(0x300, 0x10000, 64);
        // Version, erases, write and checksum go through; the reset does not.
        let mock = MockTransport::new().with_write_limit(plan.chunks.len() + 3);
        mock.queue_response(&version_reply(64, 64));
        for chunk in &plan.chunks {
            let wire_count = if chunk.blocks == 256 { 0 } else { chunk.blocks as u16 };
            mock.queue_response(&status_reply(CMD_ERASE, wire_count, chunk.address));
        }
        mock.queue_response(&status_reply(CMD_WRITE, 2, 0x400));
        mock.queue_response(&checksum_reply(2, 0x400, calc_checksum(&[1, 2])));

        let config = SessionConfig {
            reset_wait_ms: 0,
            ..Default::default()
        };
        let mut session = UpdateSession::with_observer(mock, config, Arc::new(NullObserver));
        session.run_update(&hex).unwrap();

        assert_eq!(session.state(), UpdateState::Done);
        assert!(session.reset_error().is_some());
    }
}
