//! Live progress of a job, readable from outside the running job at any time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::state_machine::{JobReport, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    /// Between items, or not started yet.
    InProgress,
    /// An item is being analysed right now.
    Processing,
    Completed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::InProgress => write!(f, "IN_PROGRESS"),
            ProgressStatus::Processing => write!(f, "PROCESSING"),
            ProgressStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_count: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub current_continuation: u32,
    pub percent_complete: f64,
    pub current_item_title: Option<String>,
    pub status: ProgressStatus,
}

/// `processed / total` as a percentage. A job with no items is 0% until it
/// has completed.
pub fn percent_complete(processed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        processed as f64 * 100.0 / total as f64
    }
}

impl JobProgress {
    /// Snapshot before any item has been looked at.
    pub fn empty() -> Self {
        Self {
            total_count: 0,
            processed_count: 0,
            success_count: 0,
            failure_count: 0,
            current_continuation: 0,
            percent_complete: 0.0,
            current_item_title: None,
            status: ProgressStatus::InProgress,
        }
    }

    pub fn from_state(
        state: &JobState,
        total: usize,
        current_item_title: Option<&str>,
        finished: bool,
    ) -> Self {
        let status = if finished {
            ProgressStatus::Completed
        } else if current_item_title.is_some() {
            ProgressStatus::Processing
        } else {
            ProgressStatus::InProgress
        };
        let percent_complete = if finished {
            100.0
        } else {
            percent_complete(state.processed_count, total)
        };
        Self {
            total_count: total,
            processed_count: state.processed_count,
            success_count: state.success_count,
            failure_count: state.failure_count,
            current_continuation: state.continuation_index,
            percent_complete,
            current_item_title: current_item_title.map(str::to_string),
            status,
        }
    }

    /// Final snapshot of a job that already completed.
    pub fn from_report(report: &JobReport) -> Self {
        Self {
            total_count: report.total_count,
            processed_count: report.success_count + report.failure_count,
            success_count: report.success_count,
            failure_count: report.failure_count,
            current_continuation: report.continuation_count,
            percent_complete: 100.0,
            current_item_title: None,
            status: ProgressStatus::Completed,
        }
    }
}

/// Write side, held by the runs of one job. Shared across continuations so
/// that observers keep the same handle for the life of the job.
#[derive(Clone)]
pub struct ProgressPublisher {
    tx: Arc<watch::Sender<JobProgress>>,
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(JobProgress::empty());
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, progress: JobProgress) {
        self.tx.send_replace(progress);
    }

    pub fn snapshot(&self) -> JobProgress {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> ProgressInspector {
        ProgressInspector {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view on a job's progress. Never blocks the job and never
/// changes its state.
#[derive(Clone)]
pub struct ProgressInspector {
    rx: watch::Receiver<JobProgress>,
}

impl ProgressInspector {
    pub fn get_progress(&self) -> JobProgress {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot. `false` once every publisher
    /// is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
