use std::fmt;

use crate::history::ExecutionHistory;

/// Why a run decided to hand off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffReason {
    /// The host advised a continue-as-new.
    HostSuggested,
    /// The record passed the local event threshold.
    LocalThreshold,
}

impl fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffReason::HostSuggested => write!(f, "host suggested continue-as-new"),
            HandoffReason::LocalThreshold => write!(f, "local history threshold reached"),
        }
    }
}

/// Decides, after each recorded item, whether the run should stop and
/// continue as a fresh run.
///
/// The local threshold sits well below the host ceiling so that one more
/// item (a fixed number of events) always fits after the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_run_events: usize,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_run_events: Self::DEFAULT_THRESHOLD,
        }
    }
}

impl RestartPolicy {
    pub const DEFAULT_THRESHOLD: usize = 4_000;

    pub fn new(max_run_events: usize) -> Self {
        Self { max_run_events }
    }

    pub fn evaluate(&self, history: &ExecutionHistory) -> Option<HandoffReason> {
        if history.continue_as_new_suggested() {
            Some(HandoffReason::HostSuggested)
        } else if history.len() > self.max_run_events {
            Some(HandoffReason::LocalThreshold)
        } else {
            None
        }
    }

    pub fn should_handoff(&self, history: &ExecutionHistory) -> bool {
        self.evaluate(history).is_some()
    }
}
