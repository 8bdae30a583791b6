//! Record writing.

use tracing::debug;

use crate::client::ProtocolError;
use crate::error::{DeviceError, UpdateError};
use crate::events::{LogLevel, UpdateObserver};
use crate::payload::WriteChunks;
use crate::state::machine::{Progress, UpdateState};
use crate::transport::ByteStream;

use super::{HandleResult, HandlerContext};

/// WRITING - write every record in file order, split at the write latch.
pub fn handle_write<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpdateError> {
    let latch = match ctx.state.version_info {
        Some(info) => usize::from(info.write_latch_size),
        None => {
            return Err(ProtocolError::UnexpectedResponse(
                "write attempted without bootloader version info".into(),
            )
            .into());
        }
    };

    for record in ctx.hex.iter() {
        if !record.is_empty() && !ctx.config.covers(record.address()) {
            ctx.log(
                LogLevel::Warn,
                format!(
                    "Record at 0x{:06X} lies outside the erased range 0x{:06X}..0x{:06X}",
                    record.address(),
                    ctx.config.erase_start,
                    ctx.config.erase_end
                ),
            );
        }
    }

    ctx.state.progress = Progress::new(ctx.hex.num_records());
    let hex = ctx.hex;
    for record in hex.iter() {
        for (address, chunk) in WriteChunks::new(record, latch) {
            debug!(address = %format!("0x{:06X}", address), len = chunk.len(), "Writing");
            let status = ctx.client.write(address, chunk)?;
            if !status.is_success() {
                return Err(DeviceError::WriteFailed {
                    address,
                    length: chunk.len(),
                }
                .into());
            }
        }
        ctx.advance_progress();
    }

    Ok(HandleResult::Next(UpdateState::Verifying))
}
