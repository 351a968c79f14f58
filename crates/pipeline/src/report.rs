use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::inventory::InventorySummary;
use crate::job::{JobStatus, TranscodeJob};
use crate::verify::VerificationRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub discovered: usize,
    pub planned: usize,
    /// Transcoded by this run
    pub succeeded: usize,
    /// Outputs already on disk that this run adopted instead of transcoding
    pub already_present: usize,
    pub failed: usize,
    /// Planned but never started (cancelled run, or no output yet on verify)
    pub not_started: usize,
    pub verified_consistent: usize,
    pub verified_inconsistent: usize,
}

/// Everything an external reporter needs about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub discovery_errors: Vec<String>,
    pub inventory: InventorySummary,
    pub jobs: Vec<TranscodeJob>,
    pub verifications: Vec<VerificationRecord>,
    pub counts: RunCounts,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        discovered: usize,
        discovery_errors: Vec<String>,
        inventory: InventorySummary,
        jobs: Vec<TranscodeJob>,
        verifications: Vec<VerificationRecord>,
        cancelled: bool,
    ) -> Self {
        let count = |status: JobStatus| {
            jobs.iter()
                .filter(|j| j.status == status && !j.existing_output)
                .count()
        };
        let consistent = verifications.iter().filter(|v| v.consistent).count();

        let counts = RunCounts {
            discovered,
            planned: jobs.len(),
            succeeded: count(JobStatus::Succeeded),
            already_present: jobs.iter().filter(|j| j.existing_output).count(),
            failed: count(JobStatus::Failed),
            not_started: count(JobStatus::Pending),
            verified_consistent: consistent,
            verified_inconsistent: verifications.len() - consistent,
        };

        Self {
            started_at,
            finished_at: Utc::now(),
            cancelled,
            discovery_errors,
            inventory,
            jobs,
            verifications,
            counts,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::media::MediaPath;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn job(name: &str, exit: Option<i32>) -> TranscodeJob {
        let input = MediaPath::from_relative(Path::new("/in"), Path::new(name)).unwrap();
        let mut job = TranscodeJob::new(input, PathBuf::from("/out").join(name));
        if let Some(code) = exit {
            job.start();
            job.finish(Some(code), 10, None);
        }
        job
    }

    #[test]
    fn test_counts() {
        let jobs = vec![job("a.mp4", Some(0)), job("b.mp4", Some(1)), job("c.mp4", None)];
        let report = RunReport::new(Utc::now(), 3, vec![], Inventory::new().summary(), jobs, vec![], true);

        assert_eq!(
            report.counts,
            RunCounts {
                discovered: 3,
                planned: 3,
                succeeded: 1,
                already_present: 0,
                failed: 1,
                not_started: 1,
                verified_consistent: 0,
                verified_inconsistent: 0,
            }
        );
        assert!(report.cancelled);
    }

    #[test]
    fn test_adopted_outputs_are_not_counted_as_transcoded() {
        let mut adopted = job("a.mp4", None);
        adopted.adopt_existing_output();
        let jobs = vec![adopted, job("b.mp4", Some(0))];
        let report = RunReport::new(Utc::now(), 2, vec![], Inventory::new().summary(), jobs, vec![], false);

        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.counts.already_present, 1);
        assert_eq!(report.counts.planned, 2);
    }

    #[test]
    fn test_write_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.json");
        let report = RunReport::new(
            Utc::now(),
            1,
            vec!["permission denied".to_string()],
            Inventory::new().summary(),
            vec![job("a.mp4", Some(0))],
            vec![],
            false,
        );
        report.write_json(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["counts"]["succeeded"], 1);
        assert_eq!(value["jobs"][0]["status"], "Succeeded");
        assert_eq!(value["discovery_errors"][0], "permission denied");
    }
}
