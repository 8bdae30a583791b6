//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, HandlerContext, handle_phase, run_phases};
pub use machine::{Progress, UpdateContext, UpdateState};
