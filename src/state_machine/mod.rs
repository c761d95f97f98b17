mod job;
mod policy;
mod state;

pub use job::{JobReport, JobRequest, RetryConfig};
pub use policy::{HandoffReason, RestartPolicy};
pub use state::{ItemFailure, JobState, RunPhase, StateMachine, Transition};
