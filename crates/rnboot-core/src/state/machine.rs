//! Update state machine.

use std::fmt;

use crate::protocol::BootVersionInfo;

/// Phase of a firmware update.
///
/// ```text
/// START -> QUERY_VERSION -> ERASING -> WRITING -> VERIFYING -> RESETTING -> DONE
///                     \________________/
///                       resume skips erase
/// ```
///
/// Every non-terminal phase can move to `FAILED`. A finished session
/// (`START`, `DONE` or `FAILED`) can be restarted at `QUERY_VERSION`, or
/// resumed directly at `WRITING` once the version info is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateState {
    #[default]
    Start,
    QueryVersion,
    Erasing,
    Writing,
    Verifying,
    Resetting,
    Done,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Start => write!(f, "START"),
            UpdateState::QueryVersion => write!(f, "QUERY_VERSION"),
            UpdateState::Erasing => write!(f, "ERASING"),
            UpdateState::Writing => write!(f, "WRITING"),
            UpdateState::Verifying => write!(f, "VERIFYING"),
            UpdateState::Resetting => write!(f, "RESETTING"),
            UpdateState::Done => write!(f, "DONE"),
            UpdateState::Failed => write!(f, "FAILED"),
        }
    }
}

impl UpdateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateState::Done | UpdateState::Failed)
    }

    /// Whether a session can (re)start from this state.
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            UpdateState::Start | UpdateState::Done | UpdateState::Failed
        )
    }

    pub fn can_transition_to(self, next: UpdateState) -> bool {
        use UpdateState::*;
        match (self, next) {
            (Failed, Failed) => false,
            (_, Failed) => !self.is_idle(),
            (Start | Done | Failed, QueryVersion | Writing) => true,
            (QueryVersion, Erasing | Writing) => true,
            (Erasing, Writing) => true,
            (Writing, Verifying) => true,
            (Verifying, Resetting) => true,
            (Resetting, Done) => true,
            _ => false,
        }
    }
}

/// Records completed in the current write or verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            100
        } else {
            ((self.completed * 100) / self.total) as u8
        }
    }
}

/// Runtime state of an update session.
#[derive(Debug, Default)]
pub struct UpdateContext {
    /// Current phase.
    pub state: UpdateState,
    /// Phase that was running when the session failed.
    pub failed_in: Option<UpdateState>,
    /// Capabilities reported by the bootloader.
    pub version_info: Option<BootVersionInfo>,
    pub progress: Progress,
    /// Failure while sending the final reset. Does not fail the session.
    pub reset_error: Option<String>,
}

impl UpdateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: UpdateState) {
        debug_assert!(
            self.state.can_transition_to(new_state),
            "illegal transition {} -> {}",
            self.state,
            new_state
        );
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// Record a failure in the current phase.
    pub fn fail(&mut self) {
        self.failed_in = Some(self.state);
        self.goto_state(UpdateState::Failed);
    }

    /// Clear per-run results before a new run.
    pub fn begin_run(&mut self) {
        self.failed_in = None;
        self.reset_error = None;
        self.progress = Progress::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain() {
        use UpdateState::*;
        let chain = [
            Start,
            QueryVersion,
            Erasing,
            Writing,
            Verifying,
            Resetting,
            Done,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Start.can_transition_to(Erasing));
        assert!(!Writing.can_transition_to(Erasing));
        assert!(!Verifying.can_transition_to(Done));
    }

    #[test]
    fn test_failed_reachable_from_active_phases() {
        use UpdateState::*;
        for state in [QueryVersion, Erasing, Writing, Verifying, Resetting] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_resume_edges() {
        use UpdateState::*;
        for state in [Start, Done, Failed] {
            assert!(state.can_transition_to(Writing));
            assert!(state.can_transition_to(QueryVersion));
        }
        assert!(QueryVersion.can_transition_to(Writing));
    }

    #[test]
    fn test_fail_records_phase() {
        let mut ctx = UpdateContext::new();
        ctx.goto_state(UpdateState::QueryVersion);
        ctx.goto_state(UpdateState::Erasing);
        ctx.fail();
        assert_eq!(ctx.state, UpdateState::Failed);
        assert_eq!(ctx.failed_in, Some(UpdateState::Erasing));
        assert!(ctx.state.is_terminal());

        ctx.begin_run();
        assert_eq!(ctx.failed_in, None);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::new(0).percent(), 100);
        let p = Progress {
            completed: 1,
            total: 4,
        };
        assert_eq!(p.percent(), 25);
    }

    #[test]
    fn test_display() {
        assert_eq!(UpdateState::QueryVersion.to_string(), "QUERY_VERSION");
        assert_eq!(UpdateState::Failed.to_string(), "FAILED");
    }
}
