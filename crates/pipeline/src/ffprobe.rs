use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use log::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot open {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("probe failed for {}: {message}", path.display())]
    Failed { path: PathBuf, message: String },
}

/// Unvalidated values as reported by the media-inspection tool.
///
/// Nothing here is trusted; the metadata probe range-checks every field.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProbe {
    pub container: String,
    pub frame_count: Option<i64>,
    pub fps: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// External media-inspection capability
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe_raw(&self, path: &Path) -> Result<RawProbe, ProbeError>;
}

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: String,
    pub duration: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub nb_frames: Option<String>,
    pub duration: Option<String>,
}

impl FFProbeData {
    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Reduce ffprobe JSON to the raw fields the pipeline cares about
    pub fn to_raw(&self) -> Option<RawProbe> {
        let video = self.video_stream()?;

        let fps = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .filter(|f| *f > 0.0)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));

        // nb_frames comes from the container index; when it's missing, estimate
        // from duration the same way frame-grabbing libraries do
        let frame_count = video
            .nb_frames
            .as_deref()
            .and_then(|n| n.trim().parse::<i64>().ok())
            .or_else(|| {
                let duration = video
                    .duration
                    .as_deref()
                    .or(self.format.duration.as_deref())
                    .and_then(|d| d.trim().parse::<f64>().ok())?;
                let fps = fps.filter(|f| *f > 0.0)?;
                Some((duration * fps).round() as i64)
            });

        Some(RawProbe {
            container: self.format.format_name.clone(),
            frame_count,
            fps,
            width: video.width,
            height: video.height,
        })
    }
}

/// Parse a frame rate like "30/1", "30000/1001" or "29.97".
///
/// "0/0" (ffprobe's way of saying unknown) comes back as 0.0 so the caller
/// can flag it rather than silently dropping it.
pub fn parse_frame_rate(frame_rate_str: &str) -> Option<f64> {
    if let Some((num_str, den_str)) = frame_rate_str.split_once('/') {
        let num = num_str.trim().parse::<f64>().ok()?;
        let den = den_str.trim().parse::<f64>().ok()?;
        if den == 0.0 {
            return Some(0.0);
        }
        return Some(num / den);
    }
    frame_rate_str.trim().parse::<f64>().ok()
}

/// Runs a native ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_bin: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    /// Run ffprobe and parse its JSON output
    pub async fn probe_file(&self, file_path: &Path) -> Result<FFProbeData, ProbeError> {
        let failed = |message: String| ProbeError::Failed {
            path: file_path.to_path_buf(),
            message,
        };

        debug!("Executing FFprobe for: {}", file_path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(file_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!(
                "failed to execute {}: {}",
                self.ffprobe_bin.display(),
                e
            )))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(failed(format!("ffprobe exit code {}: {}", exit_code, stderr.trim())));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| failed(format!("unparseable ffprobe JSON: {}", e)))
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe_raw(&self, path: &Path) -> Result<RawProbe, ProbeError> {
        let data = self.probe_file(path).await?;
        data.to_raw().ok_or_else(|| ProbeError::Failed {
            path: path.to_path_buf(),
            message: "no video stream".to_string(),
        })
    }
}
