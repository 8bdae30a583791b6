//! Checksum verification.

use tracing::debug;

use crate::client::ProtocolError;
use crate::error::{DeviceError, UpdateError};
use crate::events::UpdateObserver;
use crate::payload::HexRecord;
use crate::protocol::{BOOTLOADER_MAX_LENGTH, CONFIG_ROW_LENGTH, calc_checksum, calc_config_checksum};
use crate::state::machine::{Progress, UpdateState};
use crate::transport::ByteStream;

use super::{HandleResult, HandlerContext};

/// Checksum the device should report for `record`.
///
/// # Panics
///
/// If the record at the configuration row address is not exactly one
/// configuration row long.
pub fn expected_checksum(record: &HexRecord, config_row_address: u32) -> u16 {
    if record.address() != config_row_address {
        return calc_checksum(record.data());
    }
    match <&[u8; CONFIG_ROW_LENGTH]>::try_from(record.data()) {
        Ok(row) => calc_config_checksum(row),
        Err(_) => panic!(
            "configuration row record must be {} bytes, got {}",
            CONFIG_ROW_LENGTH,
            record.len()
        ),
    }
}

/// VERIFYING - compare the device checksum of every record.
pub fn handle_verify<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpdateError> {
    ctx.state.progress = Progress::new(ctx.hex.num_records());
    let hex = ctx.hex;
    for record in hex.iter() {
        let expected = expected_checksum(record, ctx.config.config_row_address);
        let length = u16::try_from(record.len()).map_err(|_| ProtocolError::InvalidLength {
            field: "checksum length",
            value: record.len(),
            max: BOOTLOADER_MAX_LENGTH as usize,
        })?;

        let got = ctx.client.checksum(record.address(), length)?;
        debug!(
            address = %format!("0x{:06X}", record.address()),
            expected = %format!("0x{:04X}", expected),
            got = %format!("0x{:04X}", got),
            "Verified"
        );
        if got != expected {
            return Err(DeviceError::ChecksumMismatch {
                address: record.address(),
                expected,
                got,
            }
            .into());
        }
        ctx.advance_progress();
    }

    Ok(HandleResult::Next(UpdateState::Resetting))
}
