//! Application flash erase.

use tracing::{debug, warn};

use crate::error::{DeviceError, UpdateError};
use crate::events::{LogLevel, UpdateEvent, UpdateObserver};
use crate::payload::ErasePlan;
use crate::state::machine::UpdateState;
use crate::transport::ByteStream;

use super::{HandleResult, HandlerContext};

/// ERASING - erase the configured range, at most 256 rows per command.
pub fn handle_erase<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpdateError> {
    let row_size = ctx
        .state
        .version_info
        .map(|info| u32::from(info.erase_row_size))
        .unwrap_or_default();
    let plan = ErasePlan::new(ctx.config.erase_start, ctx.config.erase_end, row_size);

    if plan.remainder > 0 {
        warn!(
            remainder = plan.remainder,
            row_size, "Erase range is not a whole number of rows"
        );
        ctx.log(
            LogLevel::Warn,
            format!(
                "Last {} bytes of the erase range do not fill a row and are left as-is",
                plan.remainder
            ),
        );
    }

    let total = plan.chunks.len();
    for (index, chunk) in plan.chunks.iter().enumerate() {
        debug!(
            address = %format!("0x{:06X}", chunk.address),
            blocks = chunk.blocks,
            "Erasing"
        );
        let status = ctx.client.erase(chunk.address, chunk.blocks)?;
        if !status.is_success() {
            return Err(DeviceError::EraseFailed {
                address: chunk.address,
                blocks: chunk.blocks,
            }
            .into());
        }
        ctx.emit(UpdateEvent::EraseChunk {
            address: chunk.address,
            blocks: chunk.blocks,
            index,
            total,
        });
    }

    Ok(HandleResult::Next(UpdateState::Writing))
}
