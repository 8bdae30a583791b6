//! Phase handlers - one per update phase.
//!
//! This module is split into submodules by phase:
//! - `version`: query bootloader capabilities
//! - `erase`: erase the application range
//! - `write`: write every record
//! - `verify`: compare device checksums against the image
//! - `reset`: leave the bootloader

mod erase;
mod reset;
mod verify;
mod version;
mod write;

use crate::client::BootloaderClient;
use crate::config::SessionConfig;
use crate::error::UpdateError;
use crate::events::{LogLevel, UpdateEvent, UpdateObserver};
use crate::payload::HexFile;
use crate::state::machine::{UpdateContext, UpdateState};
use crate::transport::ByteStream;

/// Result of handling a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// Move on to the given phase.
    Next(UpdateState),
    /// All phases complete.
    Complete,
}

/// Handler context containing all resources.
pub struct HandlerContext<'a, T: ByteStream, O: UpdateObserver> {
    pub client: BootloaderClient<T>,
    pub observer: &'a O,
    pub state: &'a mut UpdateContext,
    pub config: &'a SessionConfig,
    pub hex: &'a HexFile,
    /// Skip the erase phase (recover mode).
    pub resume: bool,
}

impl<'a, T: ByteStream, O: UpdateObserver> HandlerContext<'a, T, O> {
    pub(crate) fn emit(&self, event: UpdateEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(UpdateEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn goto(&mut self, next: UpdateState) {
        let from = self.state.state;
        self.state.goto_state(next);
        self.emit(UpdateEvent::PhaseChanged { from, to: next });
    }

    /// Record a finished record and report it.
    pub(crate) fn advance_progress(&mut self) {
        self.state.progress.completed += 1;
        self.emit(UpdateEvent::Progress {
            phase: self.state.state,
            completed: self.state.progress.completed,
            total: self.state.progress.total,
        });
    }
}

/// Perform one phase.
pub fn handle_phase<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, UpdateError> {
    match ctx.state.state {
        UpdateState::QueryVersion => version::handle_query_version(ctx),
        UpdateState::Erasing => erase::handle_erase(ctx),
        UpdateState::Writing => write::handle_write(ctx),
        UpdateState::Verifying => verify::handle_verify(ctx),
        UpdateState::Resetting => reset::handle_reset(ctx),
        UpdateState::Start | UpdateState::Done | UpdateState::Failed => Ok(HandleResult::Complete),
    }
}

/// Drive phases from `first` until the session completes or fails.
pub fn run_phases<T: ByteStream, O: UpdateObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    first: UpdateState,
) -> Result<(), UpdateError> {
    ctx.state.begin_run();
    ctx.goto(first);

    loop {
        match handle_phase(ctx) {
            Ok(HandleResult::Next(next)) => ctx.goto(next),
            Ok(HandleResult::Complete) => {
                ctx.goto(UpdateState::Done);
                ctx.emit(UpdateEvent::Complete);
                return Ok(());
            }
            Err(e) => {
                let phase = ctx.state.state;
                ctx.state.fail();
                ctx.emit(UpdateEvent::PhaseChanged {
                    from: phase,
                    to: UpdateState::Failed,
                });
                ctx.emit(UpdateEvent::Failed {
                    phase,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        }
    }
}
