use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Serializer};
use crate::config::ProbeFailurePolicy;
use crate::media::{AnomalyReason, AnomalyRecord, MediaMetadata, MediaPath};
use crate::pool::{CancelToken, WorkerPool};
use crate::probe::{MetadataProbe, ProbeOutcome};
use log::{info, warn};

/// Frame size used as a grouping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// Serialized as "WxH" so it can key a JSON object
impl Serialize for Dimensions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InventorySummary {
    pub total_files: usize,
    /// Every file that could be opened, probe failures included
    pub total_size_bytes: u64,
    /// Sum of frame_count / fps over records where both are known
    pub total_duration_seconds: f64,
    /// Records that contributed to the duration sum
    pub files_with_duration: usize,
    pub by_dimension: BTreeMap<Dimensions, usize>,
    pub by_extension: BTreeMap<String, usize>,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Every probe result for one run.
///
/// Filled once, then only read. A path may sit in both `records` and
/// `anomalies`; probe failures have an anomaly but no record.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    records: Vec<MediaMetadata>,
    anomalies: Vec<AnomalyRecord>,
    failed: Vec<MediaPath>,
    /// Bytes of probe failures that could still be opened
    failed_bytes: u64,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `paths` on a bounded pool and gather the results.
    ///
    /// Paths left unprobed by a cancellation are simply absent.
    pub async fn collect(paths: Vec<MediaPath>, probe: &MetadataProbe, pool: WorkerPool, cancel: &CancelToken) -> Self {
        info!("Probing {} file(s) with {} worker(s)", paths.len(), pool.workers());
        let outcomes = pool
            .run(paths, cancel, move |path, _| async move { probe.probe(&path).await })
            .await;

        let mut inventory = Self::new();
        let mut skipped = 0usize;
        for outcome in outcomes {
            match outcome.completed() {
                Some(o) => inventory.add(o),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("Probing cancelled; {} file(s) not probed", skipped);
        }

        info!(
            "Inventory: {} record(s), {} anomal(ies), {} probe failure(s)",
            inventory.records.len(),
            inventory.anomalies.len(),
            inventory.failed.len()
        );
        inventory
    }

    pub fn add(&mut self, outcome: ProbeOutcome) {
        match outcome.metadata {
            Some(metadata) => self.records.push(metadata),
            None => {
                self.failed_bytes += outcome.size_bytes.unwrap_or(0);
                self.failed.push(outcome.path);
            }
        }
        self.anomalies.extend(outcome.anomalies);
    }

    pub fn records(&self) -> &[MediaMetadata] {
        &self.records
    }

    pub fn anomalies(&self) -> &[AnomalyRecord] {
        &self.anomalies
    }

    pub fn probe_failures(&self) -> &[MediaPath] {
        &self.failed
    }

    pub fn anomalies_for<'a>(&'a self, path: &'a MediaPath) -> impl Iterator<Item = &'a AnomalyRecord> + 'a {
        self.anomalies.iter().filter(move |a| &a.path == path)
    }

    pub fn metadata_for(&self, path: &MediaPath) -> Option<&MediaMetadata> {
        self.records.iter().find(|m| &m.path == path)
    }

    /// Paths that should get a transcode job.
    ///
    /// Every record qualifies, anomalous or not. Under
    /// [`ProbeFailurePolicy::Transcode`] files the prober choked on are added
    /// too; files that could not even be opened never are.
    pub fn transcode_candidates(&self, policy: ProbeFailurePolicy) -> Vec<MediaPath> {
        let mut paths: Vec<MediaPath> = self.records.iter().map(|m| m.path.clone()).collect();
        if policy == ProbeFailurePolicy::Transcode {
            paths.extend(
                self.failed
                    .iter()
                    .filter(|p| {
                        self.anomalies_for(p)
                            .any(|a| a.reason == AnomalyReason::ProbeFailure)
                    })
                    .cloned(),
            );
        }
        paths
    }

    pub fn summary(&self) -> InventorySummary {
        let mut total_duration_seconds = 0.0;
        let mut files_with_duration = 0;
        let mut by_dimension = BTreeMap::new();
        let mut by_extension = BTreeMap::new();

        for record in &self.records {
            if let Some(seconds) = record.duration_seconds() {
                total_duration_seconds += seconds;
                files_with_duration += 1;
            }
            if let Some((width, height)) = record.dimensions() {
                *by_dimension.entry(Dimensions { width, height }).or_insert(0) += 1;
            }
        }
        for path in self.records.iter().map(|m| &m.path).chain(self.failed.iter()) {
            let ext = path.extension().unwrap_or_default();
            *by_extension.entry(ext).or_insert(0) += 1;
        }

        InventorySummary {
            total_files: self.records.len() + self.failed.len(),
            total_size_bytes: self.records.iter().map(|m| m.size_bytes).sum::<u64>() + self.failed_bytes,
            total_duration_seconds,
            files_with_duration,
            by_dimension,
            by_extension,
            anomalies: self.anomalies.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffprobe::RawProbe;
    use crate::probe::validate;
    use proptest::prelude::*;
    use std::path::Path;

    fn outcome(rel: &str, frames: i64, fps: f64, width: i64) -> ProbeOutcome {
        let path = MediaPath::from_relative(Path::new("/media/a"), Path::new(rel)).unwrap();
        let raw = RawProbe {
            container: "mp4".to_string(),
            frame_count: Some(frames),
            fps: Some(fps),
            width: Some(width),
            height: Some(480),
        };
        let (metadata, anomalies) = validate(&path, &raw, 1_000);
        ProbeOutcome {
            path,
            metadata: Some(metadata),
            anomalies,
            size_bytes: Some(1_000),
        }
    }

    fn failure(rel: &str, reason: AnomalyReason) -> ProbeOutcome {
        let path = MediaPath::from_relative(Path::new("/media/a"), Path::new(rel)).unwrap();
        // unreadable files never got as far as a size
        let size_bytes = (reason != AnomalyReason::UnreadableFile).then_some(500);
        ProbeOutcome {
            path: path.clone(),
            metadata: None,
            anomalies: vec![AnomalyRecord {
                path,
                reason,
                detail: String::new(),
            }],
            size_bytes,
        }
    }

    #[test]
    fn test_summary_excludes_unknown_frame_counts() {
        let mut inv = Inventory::new();
        inv.add(outcome("a.mp4", 300, 30.0, 704));
        inv.add(outcome("b.MPG", -3074457345618259968, 30.0, 720));

        let summary = inv.summary();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_duration_seconds, 10.0);
        assert_eq!(summary.files_with_duration, 1);
        assert_eq!(summary.total_size_bytes, 2_000);
        assert_eq!(summary.by_dimension.len(), 2);
        assert_eq!(summary.by_extension.get("mpg"), Some(&1));
        assert_eq!(summary.anomalies.len(), 1);
    }

    #[test]
    fn test_anomalous_record_stays_a_candidate() {
        let mut inv = Inventory::new();
        inv.add(outcome("bad.mp4", -1, 30.0, 704));
        let candidates = inv.transcode_candidates(ProbeFailurePolicy::Exclude);
        assert_eq!(candidates.len(), 1);
        assert_eq!(inv.anomalies_for(&candidates[0]).count(), 1);
        assert!(inv.metadata_for(&candidates[0]).is_some());
    }

    #[test]
    fn test_probe_failure_policy() {
        let mut inv = Inventory::new();
        inv.add(outcome("ok.mp4", 10, 10.0, 704));
        inv.add(failure("broken.mp4", AnomalyReason::ProbeFailure));
        inv.add(failure("locked.mp4", AnomalyReason::UnreadableFile));

        assert_eq!(inv.transcode_candidates(ProbeFailurePolicy::Exclude).len(), 1);
        let with_failures = inv.transcode_candidates(ProbeFailurePolicy::Transcode);
        assert_eq!(with_failures.len(), 2);
        assert_eq!(with_failures[1].relative(), Path::new("broken.mp4"));

        let summary = inv.summary();
        assert_eq!(summary.total_files, 3);
        // ok.mp4 plus broken.mp4; locked.mp4 has no known size
        assert_eq!(summary.total_size_bytes, 1_500);
    }

    #[test]
    fn test_dimensions_serialize_as_map_keys() {
        let mut inv = Inventory::new();
        inv.add(outcome("a.mp4", 1, 1.0, 704));
        let json = serde_json::to_value(inv.summary()).unwrap();
        assert_eq!(json["by_dimension"]["704x480"], 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_unknown_duration_never_changes_total(
            frames in prop::collection::vec(0i64..1_000_000, 1..20),
            bad_frames in i64::MIN..0,
            bad_fps in prop_oneof![Just(0.0f64), Just(-25.0), Just(f64::NAN)],
        ) {
            let mut inv = Inventory::new();
            for (i, f) in frames.iter().enumerate() {
                inv.add(outcome(&format!("{}.mp4", i), *f, 29.97, 704));
            }
            let before = inv.summary().total_duration_seconds;

            inv.add(outcome("neg.mp4", bad_frames, 29.97, 704));
            inv.add(outcome("zero.mp4", 100, bad_fps, 704));
            let after = inv.summary().total_duration_seconds;

            prop_assert_eq!(before, after);
            prop_assert!(after.is_finite());
        }
    }
}
