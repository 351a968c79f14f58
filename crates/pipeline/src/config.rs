use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// What to do with files whose probe failed outright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
    /// Leave them out of the job list (they stay in the anomaly list)
    Exclude,
    /// Plan a job anyway; the transcoder may cope where the prober did not
    Transcode,
}

/// How output paths are laid out under the output root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `<output_root>/<relative path>`
    Relative,
    /// `<output_root>/<input root name>/<relative path>`
    RootPrefixed,
}

/// Configuration for a batch transcoding run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input roots, scanned in this order. Never written to.
    pub input_roots: Vec<PathBuf>,
    /// Root of the mirrored output tree
    pub output_root: PathBuf,
    /// Extension allow-list, matched case-insensitively, without the dot
    pub extensions: Vec<String>,
    /// Path segments starting with any of these are excluded (e.g. "$RECYCLE")
    pub quarantine_prefixes: Vec<String>,
    /// Concurrent transcodes. Keep this at or below the number of hardware encoder units.
    pub transcode_concurrency: usize,
    /// Concurrent probes during inventory
    pub probe_concurrency: usize,
    /// Concurrent verifications
    pub verify_concurrency: usize,
    /// Relative fps tolerance between original and transcoded output (0.01 = 1%)
    pub fps_tolerance: f64,
    pub probe_failure_policy: ProbeFailurePolicy,
    pub output_layout: OutputLayout,
    /// Treat output paths differing only by case as collisions
    pub case_insensitive_collisions: bool,
    /// Path to ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Video codec passed to `-c:v`
    pub codec: String,
    /// Quality parameter passed to `-crf`
    pub crf: u32,
    /// Hardware acceleration backend for decoding (e.g. "cuda")
    pub hwaccel: Option<String>,
    /// Extra arguments inserted before the output path
    pub extra_ffmpeg_args: Vec<String>,
    /// Kill a transcode that runs longer than this
    pub transcode_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PipelineConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            input_roots: Vec::new(),
            output_root: PathBuf::from("transcoded"),
            extensions: vec!["mp4".to_string(), "mpg".to_string()],
            quarantine_prefixes: vec!["$RECYCLE".to_string()],
            transcode_concurrency: 1,
            probe_concurrency: 4,
            verify_concurrency: 4,
            fps_tolerance: 0.01,
            probe_failure_policy: ProbeFailurePolicy::Exclude,
            output_layout: OutputLayout::Relative,
            case_insensitive_collisions: true,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            codec: "libx264".to_string(),
            crf: 24,
            hwaccel: None,
            extra_ffmpeg_args: Vec::new(),
            transcode_timeout_secs: None,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Check the configuration before a run touches the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.input_roots.is_empty() {
            bail!("No input roots configured");
        }
        if self.extensions.is_empty() {
            bail!("Extension allow-list is empty; nothing would be eligible");
        }
        if !self.fps_tolerance.is_finite() || self.fps_tolerance < 0.0 {
            bail!("fps_tolerance must be a non-negative number, got {}", self.fps_tolerance);
        }
        for root in &self.input_roots {
            if self.output_root.starts_with(root) {
                bail!(
                    "Output root {} is inside input root {}; originals must stay untouched",
                    self.output_root.display(),
                    root.display()
                );
            }
            // An input root under the output root would have outputs mirrored over it
            if root.starts_with(&self.output_root) {
                bail!(
                    "Input root {} is inside output root {}; outputs could land on originals",
                    root.display(),
                    self.output_root.display()
                );
            }
        }
        Ok(())
    }

    pub fn transcode_workers(&self) -> usize {
        self.transcode_concurrency.max(1)
    }

    pub fn probe_workers(&self) -> usize {
        self.probe_concurrency.max(1)
    }

    pub fn verify_workers(&self) -> usize {
        self.verify_concurrency.max(1)
    }
}
