use std::collections::BTreeMap;
use std::path::Path;
use serde::Serialize;
use crate::job::{JobStatus, TranscodeJob};
use crate::media::{MediaMetadata, MediaPath};
use crate::pool::{CancelToken, WorkerPool};
use crate::probe::MetadataProbe;
use log::{info, warn};

/// Outcome of checking one transcoded output against its source
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRecord {
    pub job: TranscodeJob,
    pub original: Option<MediaMetadata>,
    pub transcoded: Option<MediaMetadata>,
    pub consistent: bool,
    /// field -> transcoded minus original, only for fields that differ
    pub deltas: BTreeMap<String, f64>,
    /// transcoded size / original size
    pub size_ratio: Option<f64>,
    /// Notes for the operator (probe failures, anomalies in the output)
    pub notes: Vec<String>,
}

/// Result of comparing two metadata records
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Comparison {
    pub consistent: bool,
    pub deltas: BTreeMap<String, f64>,
}

/// Frame counts must match exactly when both are known, fps within
/// `fps_tolerance` (relative). Dimension changes are recorded but allowed.
pub fn compare(original: &MediaMetadata, transcoded: &MediaMetadata, fps_tolerance: f64) -> Comparison {
    let mut consistent = true;
    let mut deltas = BTreeMap::new();

    if let (Some(o), Some(t)) = (original.frame_count, transcoded.frame_count) {
        if o != t {
            consistent = false;
            deltas.insert("frame_count".to_string(), t as f64 - o as f64);
        }
    }

    if let (Some(o), Some(t)) = (original.fps, transcoded.fps) {
        let diff = t - o;
        if diff != 0.0 {
            deltas.insert("fps".to_string(), diff);
        }
        if diff.abs() > o.abs() * fps_tolerance {
            consistent = false;
        }
    }

    for (field, o, t) in [
        ("width", original.width, transcoded.width),
        ("height", original.height, transcoded.height),
    ] {
        if let (Some(o), Some(t)) = (o, t) {
            if o != t {
                deltas.insert(field.to_string(), t as f64 - o as f64);
            }
        }
    }

    Comparison { consistent, deltas }
}

/// Re-probes both ends of finished jobs
#[derive(Clone)]
pub struct Verifier {
    probe: MetadataProbe,
    fps_tolerance: f64,
    pool: WorkerPool,
}

impl Verifier {
    pub fn new(probe: MetadataProbe, fps_tolerance: f64, concurrency: usize) -> Self {
        Self {
            probe,
            fps_tolerance,
            pool: WorkerPool::new(concurrency),
        }
    }

    /// Verify one job. Jobs that did not succeed are not probed at all.
    pub async fn verify(&self, job: &TranscodeJob) -> VerificationRecord {
        let mut record = VerificationRecord {
            job: job.clone(),
            original: None,
            transcoded: None,
            consistent: false,
            deltas: BTreeMap::new(),
            size_ratio: None,
            notes: Vec::new(),
        };

        if job.status != JobStatus::Succeeded {
            record.notes.push(format!("job is {:?}; nothing to verify", job.status));
            return record;
        }

        let original = self.probe.probe(&job.input).await;
        record.original = original.metadata;

        match output_media_path(&job.output_path) {
            Some(output) => {
                let transcoded = self.probe.probe(&output).await;
                for anomaly in &transcoded.anomalies {
                    record.notes.push(format!("output: {} ({})", anomaly.reason, anomaly.detail));
                }
                record.transcoded = transcoded.metadata;
            }
            None => record.notes.push("output path has no file name".to_string()),
        }

        match (&record.original, &record.transcoded) {
            (Some(o), Some(t)) => {
                let comparison = compare(o, t, self.fps_tolerance);
                record.consistent = comparison.consistent;
                record.deltas = comparison.deltas;
                if o.size_bytes > 0 {
                    record.size_ratio = Some(t.size_bytes as f64 / o.size_bytes as f64);
                }
            }
            (None, _) => record.notes.push("original could not be probed".to_string()),
            (_, None) => record.notes.push("transcoded output could not be probed".to_string()),
        }

        if !record.consistent {
            warn!("Verification mismatch for {}: {:?} {:?}", job.input, record.deltas, record.notes);
        }
        record
    }

    /// Verify every Succeeded job on the pool; Failed jobs are skipped
    pub async fn verify_all(&self, jobs: &[TranscodeJob], cancel: &CancelToken) -> Vec<VerificationRecord> {
        let succeeded: Vec<&TranscodeJob> = jobs.iter().filter(|j| j.status == JobStatus::Succeeded).collect();
        info!("Verifying {} transcoded file(s)", succeeded.len());

        let records: Vec<VerificationRecord> = self
            .pool
            .run(succeeded, cancel, move |job, _| async move { self.verify(job).await })
            .await
            .into_iter()
            .filter_map(|o| o.completed())
            .collect();

        let consistent = records.iter().filter(|r| r.consistent).count();
        info!(
            "Verification done: {} consistent, {} inconsistent",
            consistent,
            records.len() - consistent
        );
        records
    }
}

fn output_media_path(output: &Path) -> Option<MediaPath> {
    let parent = output.parent()?;
    let name = output.file_name()?;
    MediaPath::from_relative(parent, Path::new(name)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffprobe::{ProbeError, Prober, RawProbe};
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Reports the same values for every file, except those named "short*"
    struct FixedProber;

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe_raw(&self, path: &Path) -> Result<RawProbe, ProbeError> {
            let short = path.file_name().unwrap().to_string_lossy().starts_with("short");
            Ok(RawProbe {
                container: "mp4".to_string(),
                frame_count: Some(if short { 90 } else { 100 }),
                fps: Some(29.97),
                width: Some(720),
                height: Some(480),
            })
        }
    }

    fn metadata(frames: Option<u64>, fps: Option<f64>, width: u32) -> MediaMetadata {
        MediaMetadata {
            path: MediaPath::from_relative(Path::new("/r"), Path::new("x.mp4")).unwrap(),
            container: "mp4".to_string(),
            frame_count: frames,
            fps,
            width: Some(width),
            height: Some(480),
            size_bytes: 100,
        }
    }

    fn verifier() -> Verifier {
        Verifier::new(MetadataProbe::new(Arc::new(FixedProber)), 0.01, 2)
    }

    fn succeeded_job(input_root: &Path, output: PathBuf, name: &str) -> TranscodeJob {
        let input = MediaPath::from_relative(input_root, Path::new(name)).unwrap();
        let mut job = TranscodeJob::new(input, output);
        job.start();
        job.finish(Some(0), 1, None);
        job
    }

    #[test]
    fn test_identical_metadata_is_consistent_without_deltas() {
        let m = metadata(Some(100), Some(29.97), 720);
        let c = compare(&m, &m.clone(), 0.01);
        assert!(c.consistent);
        assert!(c.deltas.is_empty());
    }

    #[test]
    fn test_frame_mismatch_is_inconsistent() {
        let c = compare(&metadata(Some(100), Some(30.0), 720), &metadata(Some(98), Some(30.0), 720), 0.01);
        assert!(!c.consistent);
        assert_eq!(c.deltas.get("frame_count"), Some(&-2.0));
    }

    #[test]
    fn test_fps_within_tolerance_is_consistent_but_recorded() {
        let c = compare(&metadata(Some(100), Some(29.97), 720), &metadata(Some(100), Some(30.0), 720), 0.01);
        assert!(c.consistent);
        assert!(c.deltas.contains_key("fps"));

        let c = compare(&metadata(Some(100), Some(25.0), 720), &metadata(Some(100), Some(30.0), 720), 0.01);
        assert!(!c.consistent);
    }

    #[test]
    fn test_dimension_change_recorded_not_failed() {
        let c = compare(&metadata(Some(100), Some(30.0), 720), &metadata(Some(100), Some(30.0), 704), 0.01);
        assert!(c.consistent);
        assert_eq!(c.deltas.get("width"), Some(&-16.0));
    }

    #[test]
    fn test_unknown_frame_count_is_not_compared() {
        let c = compare(&metadata(None, Some(30.0), 720), &metadata(Some(5), Some(30.0), 720), 0.01);
        assert!(c.consistent);
        assert!(c.deltas.is_empty());
    }

    #[tokio::test]
    async fn test_identity_transcode() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("clip.mp4"), vec![7u8; 64]).unwrap();
        fs::copy(input.path().join("clip.mp4"), output.path().join("clip.mp4")).unwrap();

        let job = succeeded_job(input.path(), output.path().join("clip.mp4"), "clip.mp4");
        let record = verifier().verify(&job).await;
        assert!(record.consistent);
        assert!(record.deltas.is_empty());
        assert_eq!(record.size_ratio, Some(1.0));
    }

    #[tokio::test]
    async fn test_missing_output_is_inconsistent() {
        let input = TempDir::new().unwrap();
        fs::write(input.path().join("clip.mp4"), b"x").unwrap();
        let job = succeeded_job(input.path(), input.path().join("nope/clip.mp4"), "clip.mp4");

        let record = verifier().verify(&job).await;
        assert!(!record.consistent);
        assert!(record.transcoded.is_none());
        assert!(record.notes.iter().any(|n| n.contains("could not be probed")));
    }

    #[tokio::test]
    async fn test_verify_all_skips_failed_jobs() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("a.mp4"), b"a").unwrap();
        fs::write(output.path().join("short.mp4"), b"a").unwrap();

        // input a.mp4 reports 100 frames, output short.mp4 reports 90
        let ok = succeeded_job(input.path(), output.path().join("short.mp4"), "a.mp4");
        let mut failed = TranscodeJob::new(ok.input.clone(), output.path().join("b.mp4"));
        failed.start();
        failed.finish(Some(1), 1, None);

        let records = verifier().verify_all(&[ok, failed], &CancelToken::new()).await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].consistent);
        assert_eq!(records[0].deltas.get("frame_count"), Some(&-10.0));
    }

    #[tokio::test]
    async fn test_failed_job_not_probed() {
        let mut job = TranscodeJob::new(
            MediaPath::from_relative(Path::new("/in"), Path::new("a.mp4")).unwrap(),
            PathBuf::from("/out/a.mp4"),
        );
        job.start();
        job.finish(Some(1), 1, None);
        let record = verifier().verify(&job).await;
        assert!(!record.consistent);
        assert!(record.original.is_none());
    }
}
