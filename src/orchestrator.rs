use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use crate::error::BatonError;
use crate::history::{EventKind, ExecutionHistory};
use crate::progress::{JobProgress, ProgressPublisher};
use crate::review::{ItemAnalyzer, ItemOutcome, ReviewAgent};
use crate::state_machine::{
    ItemFailure, JobReport, JobRequest, JobState, RestartPolicy, StateMachine, Transition,
};

/// Log at `info` on a live run and at `trace` while replaying, so a
/// recovered run does not repeat what the crashed one already logged.
macro_rules! replay_safe_info {
    ($history:expr, $($arg:tt)+) => {
        if $history.is_replaying() {
            trace!($($arg)+)
        } else {
            info!($($arg)+)
        }
    };
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The run stopped at a safe point; a fresh run must resume from this
    /// state.
    ContinueAsNew(JobState),
    /// The item list is exhausted.
    Completed(JobReport),
}

/// One bounded run of a job.
///
/// A run is consumed by [`process_job`](Self::process_job): once it has
/// handed off or completed it no longer exists, and the next run starts from
/// nothing but the request and the carried [`JobState`].
pub struct JobOrchestrator<'a, A> {
    analyzer: &'a ItemAnalyzer<A>,
    policy: RestartPolicy,
    progress: ProgressPublisher,
    // Local to this run; rebuilt from the baton by every continuation.
    run_started_at: DateTime<Utc>,
    current_item_title: Option<String>,
    finished: bool,
}

impl<'a, A: ReviewAgent> JobOrchestrator<'a, A> {
    pub fn new(
        analyzer: &'a ItemAnalyzer<A>,
        policy: RestartPolicy,
        progress: ProgressPublisher,
    ) -> Self {
        Self {
            analyzer,
            policy,
            progress,
            run_started_at: DateTime::UNIX_EPOCH,
            current_item_title: None,
            finished: false,
        }
    }

    /// Latest progress snapshot of the job this run belongs to.
    pub fn get_progress(&self) -> JobProgress {
        self.progress.snapshot()
    }

    /// Process items from the carried state until the list is exhausted or
    /// the restart policy asks for a handoff.
    ///
    /// `state` is `None` only for the first run of a job. Every step is
    /// recorded in `history`; a history recovered from a crashed run is
    /// replayed rather than re-executed.
    pub async fn process_job(
        mut self,
        request: &JobRequest,
        state: Option<JobState>,
        history: &mut ExecutionHistory,
    ) -> Result<RunOutcome, BatonError> {
        request.validate()?;
        let total = request.total_count();
        if let Some(state) = &state {
            state.validate(total)?;
        }

        history.record(EventKind::RunStarted {
            job_id: request.job_id.clone(),
            continuation: state.as_ref().map_or(0, |s| s.continuation_index),
            resume_at: state.as_ref().map_or(0, |s| s.processed_count),
        })?;
        self.run_started_at = history.now();
        let mut state = state.unwrap_or_else(|| JobState::initial(history.now()));

        replay_safe_info!(
            history,
            job_id = %request.job_id,
            continuation = state.continuation_index,
            resume_at = state.processed_count,
            total,
            "run started"
        );
        self.publish(&state, total);

        let mut handoff_requested = false;
        loop {
            let transition = StateMachine::next(&state, total, handoff_requested);
            trace!(phase = %transition.phase(), processed = state.processed_count, "next step");
            match transition {
                Transition::Continue(index) => {
                    let item = &request.items[index];
                    self.current_item_title = Some(item.title.clone());
                    self.publish(&state, total);

                    match self.analyzer.analyze(history, index, item).await? {
                        ItemOutcome::Reviewed(report) => {
                            debug!(
                                index,
                                title = %item.title,
                                overall = %report.overall,
                                "item reviewed"
                            );
                            state.record_success(report);
                        }
                        ItemOutcome::Failed(error) => {
                            replay_safe_info!(
                                history,
                                index,
                                title = %item.title,
                                error = %error,
                                "item failed"
                            );
                            state.record_failure(ItemFailure {
                                item_index: index,
                                title: item.title.clone(),
                                error: error.to_string(),
                                failed_at: history.now(),
                            });
                        }
                    }

                    self.current_item_title = None;
                    self.publish(&state, total);

                    if let Some(reason) = self.policy.evaluate(history) {
                        debug!(%reason, events = history.len(), "handoff requested");
                        handoff_requested = true;
                    }
                }
                Transition::Handoff => {
                    state.prepare_handoff(self.elapsed_ms(history));
                    history.record(EventKind::ContinuedAsNew {
                        next_continuation: state.continuation_index,
                        processed: state.processed_count,
                    })?;
                    replay_safe_info!(
                        history,
                        job_id = %request.job_id,
                        next_continuation = state.continuation_index,
                        processed = state.processed_count,
                        events = history.len(),
                        "continuing as new"
                    );
                    return Ok(self.continue_as_new(state));
                }
                Transition::Done => break,
            }
        }

        history.record(EventKind::RunCompleted {
            processed: state.processed_count,
        })?;
        let completed_at = history.now();
        let final_run_ms = self.elapsed_ms(history);
        self.finished = true;
        self.publish(&state, total);
        replay_safe_info!(
            history,
            job_id = %request.job_id,
            success = state.success_count,
            failure = state.failure_count,
            continuations = state.continuation_index,
            "job completed"
        );
        Ok(RunOutcome::Completed(JobReport::from_state(
            state,
            request,
            completed_at,
            final_run_ms,
        )))
    }

    /// Ends the run. The state moves into the outcome, so nothing can touch
    /// it on this side of the handoff.
    fn continue_as_new(self, state: JobState) -> RunOutcome {
        RunOutcome::ContinueAsNew(state)
    }

    fn elapsed_ms(&self, history: &ExecutionHistory) -> u64 {
        (history.now() - self.run_started_at).num_milliseconds().max(0) as u64
    }

    fn publish(&self, state: &JobState, total: usize) {
        self.progress.publish(JobProgress::from_state(
            state,
            total,
            self.current_item_title.as_deref(),
            self.finished,
        ));
    }
}
