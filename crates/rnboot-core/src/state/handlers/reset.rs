//! Bootloader exit.

use tracing::{info, warn};

use crate::error::UpdateError;
use crate::events::{LogLevel, UpdateObserver};
use crate::transport::ByteStream;

use super::{HandleResult, HandlerContext};

/// RESETTING - start the new firmware. A failure here is recorded but does
/// not undo a successful verification.
pub fn handle_reset<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpdateError> {
    match ctx.client.reset() {
        Ok(()) => info!("Reset sent, module restarting"),
        Err(e) => {
            warn!(error = %e, "Reset failed");
            ctx.log(LogLevel::Warn, format!("Reset failed: {}", e));
            ctx.state.reset_error = Some(e.to_string());
        }
    }
    Ok(HandleResult::Complete)
}
