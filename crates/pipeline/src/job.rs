use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::media::MediaPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One input file, one output file, one invocation of the transcoder.
///
/// Mutated only by the worker that owns it while it runs.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeJob {
    pub id: String,
    pub input: MediaPath,
    pub output_path: PathBuf,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the job failed, when it did
    pub failure: Option<String>,
    /// Succeeded because its output was already on disk, not because this
    /// run transcoded it
    pub existing_output: bool,
}

impl TranscodeJob {
    pub fn new(input: MediaPath, output_path: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input,
            output_path,
            status: JobStatus::Pending,
            exit_code: None,
            duration_ms: None,
            started_at: None,
            finished_at: None,
            failure: None,
            existing_output: false,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, exit_code: Option<i32>, duration_ms: u64, failure: Option<String>) {
        self.exit_code = exit_code;
        self.duration_ms = Some(duration_ms);
        self.finished_at = Some(Utc::now());
        self.status = if failure.is_none() && exit_code == Some(0) {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        self.failure = match (self.status, failure) {
            (JobStatus::Failed, None) => Some(format!("exit code {}", exit_code.unwrap_or(-1))),
            (_, f) => f,
        };
    }

    /// Accept an output left by an earlier run without invoking the tool
    pub(crate) fn adopt_existing_output(&mut self) {
        self.status = JobStatus::Succeeded;
        self.existing_output = true;
        self.finished_at = Some(Utc::now());
    }

    /// A fresh pending copy for an operator-requested re-run
    pub fn retry(&self) -> Self {
        Self::new(self.input.clone(), self.output_path.clone())
    }
}
