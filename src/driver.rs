//! Host side of a job: starts runs, carries the baton from one run to the
//! next and, with a checkpoint store, survives process crashes.

use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::clock::{HostClock, SystemClock};
use crate::error::BatonError;
use crate::history::{ExecutionHistory, HostLimits};
use crate::orchestrator::{JobOrchestrator, RunOutcome};
use crate::progress::{JobProgress, ProgressInspector, ProgressPublisher};
use crate::review::{ItemAnalyzer, ReviewAgent, TestSummary, WorkItem};
use crate::state_machine::{JobReport, JobRequest, JobState, RestartPolicy};

pub struct JobDriver<A> {
    analyzer: ItemAnalyzer<A>,
    policy: RestartPolicy,
    limits: HostLimits,
    clock: Arc<dyn HostClock>,
    store: Option<CheckpointStore>,
    progress: ProgressPublisher,
}

impl<A: ReviewAgent> JobDriver<A> {
    pub fn new(analyzer: ItemAnalyzer<A>, policy: RestartPolicy) -> Self {
        Self {
            analyzer,
            policy,
            limits: HostLimits::default(),
            clock: Arc::new(SystemClock),
            store: None,
            progress: ProgressPublisher::new(),
        }
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_limits(mut self, limits: HostLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn HostClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn analyzer(&self) -> &ItemAnalyzer<A> {
        &self.analyzer
    }

    /// Read-only progress of whatever job this driver is running.
    pub fn progress(&self) -> ProgressInspector {
        self.progress.subscribe()
    }

    /// Start a new job and drive it to completion.
    pub async fn submit(&self, request: JobRequest) -> Result<JobReport, BatonError> {
        request.validate()?;
        if let Some(store) = &self.store {
            if store.has_job(&request.job_id)? {
                return Err(BatonError::InvalidRequest(format!(
                    "job {} already exists; resume it instead",
                    request.job_id
                )));
            }
            store.save_request(&request)?;
        }
        info!(job_id = %request.job_id, items = request.total_count(), "job submitted");
        self.drive(&request, None).await
    }

    /// Pick up a job from its last checkpoint, e.g. after a crash. A job
    /// that already completed returns its stored report.
    pub async fn resume(&self, job_id: &str) -> Result<JobReport, BatonError> {
        let store = self.require_store()?;
        if let Some(report) = store.load_report(job_id)? {
            self.progress.publish(JobProgress::from_report(&report));
            return Ok(report);
        }
        let request = store.load_request(job_id)?;
        let state = store.load_baton(job_id)?;
        info!(
            job_id,
            continuation = state.as_ref().map_or(0, |s| s.continuation_index),
            processed = state.as_ref().map_or(0, |s| s.processed_count),
            "resuming job"
        );
        self.drive(&request, state).await
    }

    async fn drive(
        &self,
        request: &JobRequest,
        mut state: Option<JobState>,
    ) -> Result<JobReport, BatonError> {
        loop {
            let continuation = state.as_ref().map_or(0, |s| s.continuation_index);
            let mut history = self.open_history(&request.job_id, continuation)?;
            let run = JobOrchestrator::new(&self.analyzer, self.policy, self.progress.clone());

            match run.process_job(request, state.take(), &mut history).await? {
                RunOutcome::ContinueAsNew(next) => {
                    if let Some(store) = &self.store {
                        store.save_baton(&request.job_id, &next)?;
                        store.remove_journal(&request.job_id, continuation)?;
                    }
                    state = Some(next);
                }
                RunOutcome::Completed(report) => {
                    if let Some(store) = &self.store {
                        store.save_report(&report)?;
                        store.clear_run_files(&request.job_id, report.continuation_count)?;
                    }
                    return Ok(report);
                }
            }
        }
    }

    fn open_history(
        &self,
        job_id: &str,
        continuation: u32,
    ) -> Result<ExecutionHistory, BatonError> {
        let Some(store) = &self.store else {
            return Ok(ExecutionHistory::new(self.clock.clone(), self.limits));
        };
        let events = store.load_journal(job_id, continuation)?;
        let history = ExecutionHistory::recovered(events, self.clock.clone(), self.limits);
        if !history.events().is_empty() {
            let events = history.events().len();
            warn!(job_id, continuation, events, "replaying interrupted run");
            store.rewrite_journal(job_id, continuation, history.events())?;
        }
        history.with_journal(store.journal_path(job_id, continuation)?)
    }

    fn require_store(&self) -> Result<&CheckpointStore, BatonError> {
        self.store.as_ref().ok_or_else(|| {
            BatonError::InvalidRequest("resuming a job needs a checkpoint directory".into())
        })
    }
}

/// Progress of a job as far as its checkpoints tell, for observers outside
/// the process running it.
pub fn stored_progress(store: &CheckpointStore, job_id: &str) -> Result<JobProgress, BatonError> {
    let request = store.load_request(job_id)?;
    let total = request.total_count();
    if let Some(report) = store.load_report(job_id)? {
        return Ok(JobProgress::from_report(&report));
    }
    Ok(match store.load_baton(job_id)? {
        Some(state) => JobProgress::from_state(&state, total, None, false),
        None => JobProgress {
            total_count: total,
            ..JobProgress::empty()
        },
    })
}

/// Synthetic pull requests for demos and load tests.
pub fn sample_items(count: usize) -> Vec<WorkItem> {
    (0..count)
        .map(|i| {
            WorkItem::new(
                format!("PR-{}: Sample change", i + 1),
                "Test PR for batch processing",
                format!("+ // Change {i}"),
            )
            .with_test_summary(TestSummary {
                passed: true,
                total_tests: 5,
                failed_tests: 0,
                coverage_percent: 100.0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::progress::ProgressStatus;
    use crate::review::{AnalysisKind, HeuristicAgent, ItemVerdict, Recommendation};
    use crate::state_machine::RetryConfig;
    use std::cell::Cell;
    use std::time::Duration;

    /// Heuristic reviews, except that diffs marked unparseable are rejected
    /// and the item titled `hang_on` never answers.
    struct TestAgent {
        calls: Cell<usize>,
        hang_on: Option<String>,
    }

    impl TestAgent {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                hang_on: None,
            }
        }
    }

    impl ReviewAgent for TestAgent {
        async fn analyze(
            &self,
            kind: AnalysisKind,
            item: &WorkItem,
        ) -> Result<ItemVerdict, AgentError> {
            self.calls.set(self.calls.get() + 1);
            if self.hang_on.as_deref() == Some(item.title.as_str()) {
                std::future::pending::<()>().await;
            }
            if kind == AnalysisKind::Security && item.diff.contains("unparseable") {
                return Err(AgentError::Rejected("unparseable diff".into()));
            }
            HeuristicAgent.analyze(kind, item).await
        }

        fn model_name(&self) -> &str {
            "test"
        }
    }

    fn driver(agent: TestAgent, threshold: usize) -> JobDriver<TestAgent> {
        let retry = RetryConfig {
            max_attempts: 2,
            initial_interval_ms: 10,
            ..RetryConfig::default()
        };
        JobDriver::new(ItemAnalyzer::new(agent, retry), RestartPolicy::new(threshold))
    }

    #[test]
    fn sample_items_look_like_pull_requests() {
        let items = sample_items(3);
        assert_eq!(items[0].title, "PR-1: Sample change");
        assert_eq!(items[2].diff, "+ // Change 2");
        assert_eq!(items[1].description, "Test PR for batch processing");
        assert!(items[0].test_summary.as_ref().unwrap().passed);
    }

    #[tokio::test]
    async fn large_job_is_split_into_bounded_runs() {
        let mut items = sample_items(9_000);
        for item in items.iter_mut().skip(999).step_by(1_000) {
            item.diff = "+ // unparseable".into();
        }
        let driver = driver(TestAgent::new(), RestartPolicy::DEFAULT_THRESHOLD);
        let inspector = driver.progress();

        let report = driver.submit(JobRequest::new("batch-9000", items)).await.unwrap();

        assert_eq!(report.total_count, 9_000);
        assert_eq!(report.success_count + report.failure_count, 9_000);
        assert_eq!(report.failure_count, 9);
        // 1 + 9 * 445 events pass the threshold, so each run takes 445 items.
        assert_eq!(report.continuation_count, 20);
        assert_eq!(driver.analyzer().agent().calls.get(), 9_000 * 3);

        let indices: Vec<usize> = report
            .results
            .iter()
            .map(|r| r.item_index)
            .chain(report.failures.iter().map(|f| f.item_index))
            .collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 9_000);
        assert!(report.results.iter().all(|r| r.overall == Recommendation::Approve));

        let progress = inspector.get_progress();
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert_eq!(progress.current_continuation, 20);
    }

    #[tokio::test]
    async fn resume_needs_a_store() {
        let driver = driver(TestAgent::new(), 40);
        assert!(matches!(driver.resume("batch-x").await, Err(BatonError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn completed_job_leaves_only_request_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let driver = driver(TestAgent::new(), 40).with_store(store.clone());

        let report = driver.submit(JobRequest::new("batch-12", sample_items(12))).await.unwrap();

        assert_eq!(report.continuation_count, 2);
        assert_eq!(store.load_report("batch-12").unwrap(), Some(report.clone()));
        assert_eq!(store.load_baton("batch-12").unwrap(), None);
        for continuation in 0..=2 {
            assert!(!store.journal_path("batch-12", continuation).unwrap().exists());
        }

        let progress = stored_progress(&store, "batch-12").unwrap();
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert_eq!(progress.processed_count, 12);

        // Resuming a finished job hands back the stored report.
        let again = driver.resume("batch-12").await.unwrap();
        assert_eq!(again, report);
        assert_eq!(driver.analyzer().agent().calls.get(), 12 * 3);

        let duplicate = driver.submit(JobRequest::new("batch-12", sample_items(1))).await;
        assert!(matches!(duplicate, Err(BatonError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn resuming_a_finished_job_reports_it_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let first = driver(TestAgent::new(), 40).with_store(store.clone());
        let report = first
            .submit(JobRequest::new("batch-done", sample_items(3)))
            .await
            .unwrap();

        let fresh = driver(TestAgent::new(), 40).with_store(store);
        let mut inspector = fresh.progress();
        assert_eq!(inspector.get_progress().status, ProgressStatus::InProgress);

        let again = fresh.resume("batch-done").await.unwrap();

        assert_eq!(again, report);
        assert!(inspector.changed().await);
        let progress = inspector.get_progress();
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert_eq!(progress.percent_complete, 100.0);
        assert_eq!(progress.total_count, 3);
        assert_eq!(progress.processed_count, 3);
        assert_eq!(fresh.analyzer().agent().calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_job_resumes_from_its_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        // 5 items per run; the process dies while item 8 is in flight.
        let crashing = driver(
            TestAgent {
                hang_on: Some("PR-8: Sample change".into()),
                ..TestAgent::new()
            },
            40,
        )
        .with_store(store.clone());
        let crashed = tokio::time::timeout(
            Duration::from_secs(1),
            crashing.submit(JobRequest::new("batch-crash", sample_items(12))),
        )
        .await;
        assert!(crashed.is_err());
        drop(crashing);

        let baton = store.load_baton("batch-crash").unwrap().unwrap();
        assert_eq!(baton.processed_count, 5);
        assert_eq!(baton.continuation_index, 1);
        let progress = stored_progress(&store, "batch-crash").unwrap();
        assert_eq!(progress.processed_count, 5);
        assert_eq!(progress.status, ProgressStatus::InProgress);

        let recovering = driver(TestAgent::new(), 40).with_store(store.clone());
        let report = recovering.resume("batch-crash").await.unwrap();

        assert_eq!(report.success_count, 12);
        assert_eq!(report.continuation_count, 2);
        // Items 6 and 7 were replayed from the record; only 8..=12 ran again.
        assert_eq!(recovering.analyzer().agent().calls.get(), 5 * 3);
        let indices: Vec<usize> = report.results.iter().map(|r| r.item_index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }
}
