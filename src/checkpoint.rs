//! On-disk checkpoints, one directory per job:
//!
//! ```text
//! <root>/<job_id>/request.json          immutable job input
//! <root>/<job_id>/baton.json            state carried into the next run
//! <root>/<job_id>/history-<n>.jsonl     execution record of run n
//! <root>/<job_id>/report.json           final report
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::BatonError;
use crate::history::HistoryEvent;
use crate::state_machine::{JobReport, JobRequest, JobState};

const REQUEST_FILE: &str = "request.json";
const BATON_FILE: &str = "baton.json";
const REPORT_FILE: &str = "report.json";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BatonError + '_ {
    move |source| BatonError::CheckpointIo {
        path: path.to_path_buf(),
        source,
    }
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &str) -> Result<PathBuf, BatonError> {
        let valid = !job_id.is_empty()
            && job_id != "."
            && job_id != ".."
            && !job_id.contains(['/', '\\']);
        if !valid {
            return Err(BatonError::InvalidRequest(format!(
                "job id {job_id:?} cannot be used as a checkpoint name"
            )));
        }
        Ok(self.root.join(job_id))
    }

    pub fn journal_path(&self, job_id: &str, continuation: u32) -> Result<PathBuf, BatonError> {
        Ok(self.job_dir(job_id)?.join(format!("history-{continuation}.jsonl")))
    }

    pub fn has_job(&self, job_id: &str) -> Result<bool, BatonError> {
        Ok(self.job_dir(job_id)?.join(REQUEST_FILE).exists())
    }

    pub fn save_request(&self, request: &JobRequest) -> Result<(), BatonError> {
        let dir = self.job_dir(&request.job_id)?;
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        write_json_atomic(&dir.join(REQUEST_FILE), request)
    }

    pub fn load_request(&self, job_id: &str) -> Result<JobRequest, BatonError> {
        read_json(&self.job_dir(job_id)?.join(REQUEST_FILE))?
            .ok_or_else(|| BatonError::CheckpointNotFound(job_id.to_string()))
    }

    /// Persist the state a continuation starts from. Replaces the previous
    /// baton atomically so a crash leaves either the old or the new one.
    pub fn save_baton(&self, job_id: &str, state: &JobState) -> Result<(), BatonError> {
        write_json_atomic(&self.job_dir(job_id)?.join(BATON_FILE), state)
    }

    /// `None` while the job is still in its first run.
    pub fn load_baton(&self, job_id: &str) -> Result<Option<JobState>, BatonError> {
        read_json(&self.job_dir(job_id)?.join(BATON_FILE))
    }

    pub fn save_report(&self, report: &JobReport) -> Result<(), BatonError> {
        write_json_atomic(&self.job_dir(&report.job_id)?.join(REPORT_FILE), report)
    }

    pub fn load_report(&self, job_id: &str) -> Result<Option<JobReport>, BatonError> {
        read_json(&self.job_dir(job_id)?.join(REPORT_FILE))
    }

    /// Events a crashed run left behind. A torn final line, from a crash in
    /// the middle of a write, is dropped; damage anywhere else is an error.
    pub fn load_journal(
        &self,
        job_id: &str,
        continuation: u32,
    ) -> Result<Vec<HistoryEvent>, BatonError> {
        let path = self.journal_path(job_id, continuation)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path)(e)),
        };

        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<HistoryEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) if i + 1 == lines.len() => {
                    warn!(path = %path.display(), error = %e, "dropping torn journal line");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(events)
    }

    /// Rewrite a journal to exactly `events`. Used on recovery, after a torn
    /// line or an unclosed analysis start was dropped, so that appends
    /// continue from a clean file.
    pub fn rewrite_journal(
        &self,
        job_id: &str,
        continuation: u32,
        events: &[HistoryEvent],
    ) -> Result<(), BatonError> {
        let path = self.journal_path(job_id, continuation)?;
        let mut contents = Vec::new();
        for event in events {
            contents.extend(serde_json::to_vec(event)?);
            contents.push(b'\n');
        }
        write_atomic(&path, &contents)
    }

    pub fn remove_journal(&self, job_id: &str, continuation: u32) -> Result<(), BatonError> {
        remove_if_exists(&self.journal_path(job_id, continuation)?)
    }

    /// Drop everything only an unfinished job needs.
    pub fn clear_run_files(&self, job_id: &str, last_continuation: u32) -> Result<(), BatonError> {
        remove_if_exists(&self.job_dir(job_id)?.join(BATON_FILE))?;
        for continuation in 0..=last_continuation {
            self.remove_journal(job_id, continuation)?;
        }
        Ok(())
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BatonError> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), BatonError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, BatonError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path)(e)),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), BatonError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::EventKind;
    use crate::review::WorkItem;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, CheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join(".baton"));
        (dir, store)
    }

    fn event(processed: usize) -> HistoryEvent {
        HistoryEvent {
            at: Utc::now(),
            event: EventKind::RunCompleted { processed },
        }
    }

    #[test]
    fn request_and_baton_roundtrip() {
        let (_dir, store) = store();
        let items = vec![WorkItem::new("PR-1: Sample change", "", "")];
        let request = JobRequest::new("batch-1", items);
        store.save_request(&request).unwrap();
        assert_eq!(store.load_request("batch-1").unwrap(), request);

        assert_eq!(store.load_baton("batch-1").unwrap(), None);
        let mut state = JobState::initial(Utc::now());
        state.prepare_handoff(10);
        store.save_baton("batch-1", &state).unwrap();
        assert_eq!(store.load_baton("batch-1").unwrap(), Some(state));
        assert!(!store.root().join("batch-1").join("baton.tmp").exists());
    }

    #[test]
    fn missing_job_is_not_found() {
        let (_dir, store) = store();
        let err = store.load_request("nope").unwrap_err();
        assert!(matches!(err, BatonError::CheckpointNotFound(id) if id == "nope"));
    }

    #[test]
    fn unsafe_job_ids_are_rejected() {
        let (_dir, store) = store();
        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(store.load_baton(id), Err(BatonError::InvalidRequest(_))));
        }
    }

    #[test]
    fn torn_last_journal_line_is_dropped() {
        let (_dir, store) = store();
        store.rewrite_journal("batch-2", 0, &[event(0), event(1)]).unwrap();
        let path = store.journal_path("batch-2", 0).unwrap();
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{\"at\":\"2024-01-0");
        fs::write(&path, contents).unwrap();

        let events = store.load_journal("batch-2", 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, EventKind::RunCompleted { processed: 1 });
    }

    #[test]
    fn damaged_journal_middle_is_an_error() {
        let (_dir, store) = store();
        let path = store.journal_path("batch-3", 0).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let good = serde_json::to_string(&event(0)).unwrap();
        fs::write(&path, format!("garbage\n{good}\n")).unwrap();
        assert!(matches!(store.load_journal("batch-3", 0), Err(BatonError::Json(_))));
    }

    #[test]
    fn clearing_run_files_keeps_request_and_report() {
        let (_dir, store) = store();
        let request = JobRequest::new("batch-4", vec![]);
        store.save_request(&request).unwrap();
        store.save_baton("batch-4", &JobState::initial(Utc::now())).unwrap();
        store.rewrite_journal("batch-4", 0, &[event(0)]).unwrap();
        store.rewrite_journal("batch-4", 1, &[event(0)]).unwrap();

        store.clear_run_files("batch-4", 1).unwrap();

        assert_eq!(store.load_baton("batch-4").unwrap(), None);
        assert!(store.load_journal("batch-4", 1).unwrap().is_empty());
        assert!(store.load_request("batch-4").is_ok());
    }
}
