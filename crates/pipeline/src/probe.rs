use std::sync::Arc;
use crate::ffprobe::{ProbeError, Prober, RawProbe};
use crate::media::{AnomalyReason, AnomalyRecord, MediaMetadata, MediaPath};
use log::{debug, warn};

/// Result of probing one file.
///
/// `metadata` and `anomalies` are not exclusive: a file with a corrupt frame
/// count still gets metadata (frame count unknown) plus an anomaly.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub path: MediaPath,
    pub metadata: Option<MediaMetadata>,
    pub anomalies: Vec<AnomalyRecord>,
    /// Size on disk, known whenever the file could be opened
    pub size_bytes: Option<u64>,
}

impl ProbeOutcome {
    fn failed(path: &MediaPath, reason: AnomalyReason, detail: String, size_bytes: Option<u64>) -> Self {
        warn!("{}: {} ({})", path, reason, detail);
        Self {
            path: path.clone(),
            metadata: None,
            anomalies: vec![AnomalyRecord {
                path: path.clone(),
                reason,
                detail,
            }],
            size_bytes,
        }
    }

    /// True when the probe produced nothing usable
    pub fn is_probe_failure(&self) -> bool {
        self.metadata.is_none()
    }
}

/// Wraps an untrusted [`Prober`] and range-checks everything it reports
#[derive(Clone)]
pub struct MetadataProbe {
    prober: Arc<dyn Prober>,
}

impl MetadataProbe {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    pub async fn probe(&self, path: &MediaPath) -> ProbeOutcome {
        let full = path.full_path();

        // Read-only open: catches permission problems before the prober does
        let size_bytes = match tokio::fs::File::open(&full).await {
            Ok(file) => match file.metadata().await {
                Ok(m) => m.len(),
                Err(e) => return ProbeOutcome::failed(path, AnomalyReason::UnreadableFile, e.to_string(), None),
            },
            Err(e) => return ProbeOutcome::failed(path, AnomalyReason::UnreadableFile, e.to_string(), None),
        };

        let raw = match self.prober.probe_raw(&full).await {
            Ok(raw) => raw,
            Err(ProbeError::Unreadable { source, .. }) => {
                return ProbeOutcome::failed(path, AnomalyReason::UnreadableFile, source.to_string(), Some(size_bytes))
            }
            Err(e @ ProbeError::Failed { .. }) => {
                return ProbeOutcome::failed(path, AnomalyReason::ProbeFailure, e.to_string(), Some(size_bytes))
            }
        };

        let (metadata, anomalies) = validate(path, &raw, size_bytes);
        for anomaly in &anomalies {
            warn!("{}: {} ({})", path, anomaly.reason, anomaly.detail);
        }
        debug!(
            "Probed {}: {} frames={:?} fps={:?} {}x{}",
            path,
            metadata.container,
            metadata.frame_count,
            metadata.fps,
            metadata.width.unwrap_or(0),
            metadata.height.unwrap_or(0)
        );

        ProbeOutcome {
            path: path.clone(),
            metadata: Some(metadata),
            anomalies,
            size_bytes: Some(size_bytes),
        }
    }
}

/// Turn raw probe values into a validated record plus any anomalies.
///
/// A negative frame count is an overflow artifact, never a real value; it
/// becomes unknown so no aggregate ever divides by or sums it.
pub fn validate(path: &MediaPath, raw: &RawProbe, size_bytes: u64) -> (MediaMetadata, Vec<AnomalyRecord>) {
    let mut anomalies = Vec::new();

    let frame_count = match raw.frame_count {
        Some(n) if n < 0 => {
            anomalies.push(AnomalyRecord {
                path: path.clone(),
                reason: AnomalyReason::NegativeFrameCount,
                detail: format!("raw frame count {}", n),
            });
            None
        }
        Some(n) => Some(n as u64),
        None => None,
    };

    let fps = match raw.fps {
        Some(f) if f.is_finite() && f > 0.0 => Some(f),
        other => {
            let detail = match other {
                Some(f) => format!("raw fps {}", f),
                None => "fps not reported".to_string(),
            };
            anomalies.push(AnomalyRecord {
                path: path.clone(),
                reason: AnomalyReason::ZeroFps,
                detail,
            });
            None
        }
    };

    let dimension = |v: Option<i64>| v.filter(|v| *v > 0).and_then(|v| u32::try_from(v).ok());

    let metadata = MediaMetadata {
        path: path.clone(),
        container: raw.container.clone(),
        frame_count,
        fps,
        width: dimension(raw.width),
        height: dimension(raw.height),
        size_bytes,
    };

    (metadata, anomalies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct ScriptedProber(HashMap<PathBuf, RawProbe>);

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe_raw(&self, path: &Path) -> Result<RawProbe, ProbeError> {
            self.0.get(path).cloned().ok_or_else(|| ProbeError::Failed {
                path: path.to_path_buf(),
                message: "moov atom not found".to_string(),
            })
        }
    }

    fn raw(frames: i64, fps: f64) -> RawProbe {
        RawProbe {
            container: "mp4".to_string(),
            frame_count: Some(frames),
            fps: Some(fps),
            width: Some(704),
            height: Some(480),
        }
    }

    fn media(root: &Path, rel: &str) -> MediaPath {
        MediaPath::from_relative(root, Path::new(rel)).unwrap()
    }

    #[test]
    fn test_negative_frame_count_is_unknown_and_flagged() {
        let path = media(Path::new("/r"), "cam/clip.mp4");
        let (meta, anomalies) = validate(&path, &raw(-3074457345618259968, 29.97), 1000);
        assert_eq!(meta.frame_count, None);
        assert_eq!(meta.fps, Some(29.97));
        assert_eq!(meta.dimensions(), Some((704, 480)));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].reason, AnomalyReason::NegativeFrameCount);
    }

    #[test]
    fn test_zero_fps_is_unknown_and_flagged() {
        let path = media(Path::new("/r"), "clip.mp4");
        let (meta, anomalies) = validate(&path, &raw(100, 0.0), 1);
        assert_eq!(meta.fps, None);
        assert_eq!(meta.frame_count, Some(100));
        assert_eq!(anomalies[0].reason, AnomalyReason::ZeroFps);

        let (meta, anomalies) = validate(&path, &raw(100, f64::NAN), 1);
        assert_eq!(meta.fps, None);
        assert_eq!(anomalies.len(), 1);
    }

    #[test]
    fn test_clean_record_has_no_anomalies() {
        let path = media(Path::new("/r"), "clip.mp4");
        let (meta, anomalies) = validate(&path, &raw(300, 30.0), 5);
        assert!(anomalies.is_empty());
        assert_eq!(meta.duration_seconds(), Some(10.0));
        assert_eq!(meta.size_bytes, 5);
    }

    #[test]
    fn test_bad_dimensions_dropped() {
        let path = media(Path::new("/r"), "clip.mp4");
        let mut r = raw(1, 1.0);
        r.width = Some(-1);
        r.height = Some(i64::MAX);
        let (meta, _) = validate(&path, &r, 0);
        assert_eq!(meta.width, None);
        assert_eq!(meta.height, None);
    }

    #[tokio::test]
    async fn test_probe_reads_size_from_filesystem() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("clip.mp4"), vec![0u8; 42]).unwrap();
        let path = media(dir.path(), "clip.mp4");

        let mut script = HashMap::new();
        script.insert(path.full_path(), raw(300, 30.0));
        let probe = MetadataProbe::new(Arc::new(ScriptedProber(script)));

        let outcome = probe.probe(&path).await;
        assert_eq!(outcome.metadata.unwrap().size_bytes, 42);
        assert!(outcome.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = media(dir.path(), "gone.mp4");
        let probe = MetadataProbe::new(Arc::new(ScriptedProber(HashMap::new())));

        let outcome = probe.probe(&path).await;
        assert!(outcome.is_probe_failure());
        assert_eq!(outcome.anomalies[0].reason, AnomalyReason::UnreadableFile);
    }

    #[tokio::test]
    async fn test_prober_error_is_probe_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.mp4"), b"junk").unwrap();
        let path = media(dir.path(), "broken.mp4");
        let probe = MetadataProbe::new(Arc::new(ScriptedProber(HashMap::new())));

        let outcome = probe.probe(&path).await;
        assert!(outcome.is_probe_failure());
        assert_eq!(outcome.anomalies[0].reason, AnomalyReason::ProbeFailure);
        assert_eq!(outcome.size_bytes, Some(4));
    }
}
