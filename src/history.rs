//! Durable, append-only execution record of one run.
//!
//! Every externally visible step of a run (start, sub-analysis scheduling,
//! completion, handoff) is recorded here in order. A run restarted after a
//! crash is given the record it left behind and re-executes against it:
//! steps that were already recorded are matched position by position and
//! their recorded outcomes are reused instead of calling the agents again.
//!
//! The record is also what bounds a run. Its length and serialized size are
//! what the host advisory and the hard event ceiling look at.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::HostClock;
use crate::error::BatonError;
use crate::review::{AnalysisKind, ItemVerdict};

/// Size limits enforced by the host on a single run's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    /// Event count at which the host starts suggesting a handoff.
    pub suggest_after_events: usize,
    /// Serialized size at which the host starts suggesting a handoff.
    pub suggest_after_bytes: usize,
    /// Hard ceiling. Recording past it is a fatal fault.
    pub max_events: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            suggest_after_events: 10_240,
            suggest_after_bytes: 4 * 1024 * 1024,
            max_events: 51_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        job_id: String,
        continuation: u32,
        resume_at: usize,
    },
    AnalysisScheduled {
        item: usize,
        kind: AnalysisKind,
    },
    AnalysisStarted {
        item: usize,
        kind: AnalysisKind,
        attempts: u32,
    },
    AnalysisCompleted {
        item: usize,
        kind: AnalysisKind,
        verdict: ItemVerdict,
    },
    AnalysisFailed {
        item: usize,
        kind: AnalysisKind,
        error: String,
    },
    ContinuedAsNew {
        next_continuation: u32,
        processed: usize,
    },
    RunCompleted {
        processed: usize,
    },
}

impl EventKind {
    fn label(&self) -> String {
        match self {
            EventKind::RunStarted {
                job_id,
                continuation,
                resume_at,
            } => format!("run_started({job_id}, #{continuation}, at {resume_at})"),
            EventKind::AnalysisScheduled { item, kind } => {
                format!("analysis_scheduled({item}, {kind})")
            }
            EventKind::AnalysisStarted {
                item,
                kind,
                attempts,
            } => format!("analysis_started({item}, {kind}, attempts={attempts})"),
            EventKind::AnalysisCompleted {
                item,
                kind,
                verdict,
            } => format!("analysis_completed({item}, {kind}, {verdict:?})"),
            EventKind::AnalysisFailed { item, kind, error } => {
                format!("analysis_failed({item}, {kind}, {error:?})")
            }
            EventKind::ContinuedAsNew {
                next_continuation,
                processed,
            } => format!("continued_as_new(#{next_continuation}, processed={processed})"),
            EventKind::RunCompleted { processed } => {
                format!("run_completed(processed={processed})")
            }
        }
    }

    fn is_analysis_started(&self) -> bool {
        matches!(self, EventKind::AnalysisStarted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub at: DateTime<Utc>,
    pub event: EventKind,
}

/// Outcome of one sub-analysis as found in a recovered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOutcome {
    pub attempts: u32,
    pub result: Result<ItemVerdict, String>,
}

pub struct ExecutionHistory {
    events: Vec<HistoryEvent>,
    /// Number of events this run has reached. Below `events.len()` the run
    /// is still replaying.
    position: usize,
    /// Serialized size of `events[..position]`.
    bytes: usize,
    clock: Arc<dyn HostClock>,
    limits: HostLimits,
    journal: Option<(PathBuf, File)>,
}

impl ExecutionHistory {
    pub fn new(clock: Arc<dyn HostClock>, limits: HostLimits) -> Self {
        Self::recovered(Vec::new(), clock, limits)
    }

    /// A record left behind by a crashed run. The next run replays it.
    ///
    /// A trailing `AnalysisStarted` is dropped: the crash hit before its
    /// outcome was written, so the analysis runs again and its attempt count
    /// is recorded afresh.
    pub fn recovered(
        mut events: Vec<HistoryEvent>,
        clock: Arc<dyn HostClock>,
        limits: HostLimits,
    ) -> Self {
        if events.last().is_some_and(|last| last.event.is_analysis_started()) {
            events.pop();
        }
        Self {
            events,
            position: 0,
            bytes: 0,
            clock,
            limits,
            journal: None,
        }
    }

    /// Append every newly recorded event to `path` as one JSON line.
    pub fn with_journal(mut self, path: impl AsRef<Path>) -> Result<Self, BatonError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| BatonError::CheckpointIo {
                path: path.clone(),
                source,
            })?;
        self.journal = Some((path, file));
        Ok(self)
    }

    /// Record the next step of the run.
    ///
    /// While replaying, the step must be exactly the one recorded at this
    /// position; anything else means the run diverged from its recorded
    /// execution.
    pub fn record(&mut self, event: EventKind) -> Result<&HistoryEvent, BatonError> {
        let index = self.position;
        if let Some(recorded) = self.events.get(index) {
            if recorded.event != event {
                return Err(BatonError::NonDeterminism {
                    position: index,
                    expected: recorded.event.label(),
                    actual: event.label(),
                });
            }
        } else {
            if index >= self.limits.max_events {
                return Err(BatonError::HistoryLimitExceeded {
                    limit: self.limits.max_events,
                });
            }
            // Time never goes backwards within a record.
            let at = match self.events.last() {
                Some(last) => self.clock.now().max(last.at),
                None => self.clock.now(),
            };
            let fresh = HistoryEvent { at, event };
            self.append_to_journal(&fresh)?;
            self.events.push(fresh);
        }

        self.bytes += serde_json::to_vec(&self.events[index])?.len();
        self.position += 1;
        Ok(&self.events[index])
    }

    fn append_to_journal(&mut self, event: &HistoryEvent) -> Result<(), BatonError> {
        let Some((path, file)) = &mut self.journal else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line).map_err(|source| BatonError::CheckpointIo {
            path: path.clone(),
            source,
        })
    }

    /// Current time as seen by the run: the timestamp of the last event it
    /// reached. Replays therefore see exactly the times of the original run.
    pub fn now(&self) -> DateTime<Utc> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.events.get(i))
            .map(|e| e.at)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Events reached by this run so far.
    pub fn len(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_replaying(&self) -> bool {
        self.position < self.events.len()
    }

    /// Host advisory: the record is large enough that the run should hand
    /// off at the next safe point.
    pub fn continue_as_new_suggested(&self) -> bool {
        self.position >= self.limits.suggest_after_events
            || self.bytes >= self.limits.suggest_after_bytes
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Look ahead in the not yet replayed part of the record for the closed
    /// outcome of one sub-analysis. `None` when it never closed, in which
    /// case the analysis has to run again.
    pub fn recorded_outcome(&self, item: usize, kind: AnalysisKind) -> Option<RecordedOutcome> {
        let pending = self.events.get(self.position..)?;
        let mut attempts = None;
        for recorded in pending {
            match &recorded.event {
                EventKind::AnalysisStarted {
                    item: i,
                    kind: k,
                    attempts: n,
                } if *i == item && *k == kind => {
                    attempts = Some(*n);
                }
                EventKind::AnalysisCompleted {
                    item: i,
                    kind: k,
                    verdict,
                } if *i == item && *k == kind => {
                    return Some(RecordedOutcome {
                        attempts: attempts?,
                        result: Ok(verdict.clone()),
                    });
                }
                EventKind::AnalysisFailed {
                    item: i,
                    kind: k,
                    error,
                } if *i == item && *k == kind => {
                    return Some(RecordedOutcome {
                        attempts: attempts?,
                        result: Err(error.clone()),
                    });
                }
                _ => {}
            }
        }
        None
    }
}
