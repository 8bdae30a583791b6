//! Bootloader version query.

use tracing::info;

use crate::client::ProtocolError;
use crate::error::UpdateError;
use crate::events::{UpdateEvent, UpdateObserver};
use crate::state::machine::UpdateState;
use crate::transport::ByteStream;

use super::{HandleResult, HandlerContext};

/// QUERY_VERSION - read erase row and write latch sizes.
pub fn handle_query_version<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpdateError> {
    let info = ctx.client.get_version_info()?;
    info!(%info, "Bootloader version info");

    if info.erase_row_size == 0 || info.write_latch_size == 0 {
        return Err(ProtocolError::UnexpectedResponse(format!(
            "bootloader reported erase row {} and write latch {}",
            info.erase_row_size, info.write_latch_size
        ))
        .into());
    }

    ctx.state.version_info = Some(info);
    ctx.emit(UpdateEvent::VersionInfo(info));

    if ctx.resume {
        Ok(HandleResult::Next(UpdateState::Writing))
    } else {
        Ok(HandleResult::Next(UpdateState::Erasing))
    }
}
