//! Batch review of pull requests in bounded runs. A job that would outgrow
//! one run's execution record hands its accumulated state to a fresh run
//! and continues there.

pub mod anthropic;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod progress;
pub mod review;
pub mod state_machine;
pub mod ui;

pub use driver::JobDriver;
pub use error::BatonError;
pub use orchestrator::{JobOrchestrator, RunOutcome};
pub use progress::{JobProgress, ProgressInspector};
pub use state_machine::{JobReport, JobRequest, JobState};
