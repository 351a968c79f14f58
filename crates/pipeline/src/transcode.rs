use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use crate::config::PipelineConfig;
use crate::job::{JobStatus, TranscodeJob};
use crate::pool::{CancelToken, PoolOutcome, WorkerPool};
use log::{debug, error, info, warn};

/// Lines of transcoder stderr kept for the failure message
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for stderr to close once the process is gone
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How one transcoder invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Killed because the run was cancelled
    pub cancelled: bool,
    pub stderr_tail: String,
}

/// External transcoding tool
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Transcode `input` into `output`. Must stop promptly once `cancel` fires.
    async fn invoke(&self, input: &Path, output: &Path, cancel: &CancelToken) -> Result<Invocation>;
}

enum Ended {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Runs a native ffmpeg binary with a fixed flag set
#[derive(Debug, Clone)]
pub struct FfmpegInvoker {
    ffmpeg_bin: PathBuf,
    codec: String,
    crf: u32,
    hwaccel: Option<String>,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
}

impl FfmpegInvoker {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            codec: cfg.codec.clone(),
            crf: cfg.crf,
            hwaccel: cfg.hwaccel.clone(),
            extra_args: cfg.extra_ffmpeg_args.clone(),
            timeout: cfg.transcode_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn ffmpeg_bin(&self) -> &Path {
        &self.ffmpeg_bin
    }

    /// Build the argument list for one job
    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-nostdin".to_string()];

        // Decode on the GPU when asked to, keeping frames on the device
        if let Some(hwaccel) = &self.hwaccel {
            args.extend([
                "-hwaccel".to_string(),
                hwaccel.clone(),
                "-hwaccel_output_format".to_string(),
                hwaccel.clone(),
            ]);
        }

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        args.extend([
            "-c:v".to_string(),
            self.codec.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
        ]);
        args.extend(self.extra_args.iter().cloned());

        args.push(output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl ToolInvoker for FfmpegInvoker {
    async fn invoke(&self, input: &Path, output: &Path, cancel: &CancelToken) -> Result<Invocation> {
        let args = self.build_args(input, output);
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        // Keep only the tail
        let stderr_handle = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let timeout = self.timeout;
        let timed_out = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = cancel.cancelled() => Ended::Cancelled,
            _ = timed_out => Ended::TimedOut,
        };

        let (status, cancelled) = match ended {
            Ended::Exited(status) => (Some(status.context("Failed to wait for FFmpeg process")?), false),
            Ended::Cancelled => {
                warn!("Cancelling FFmpeg for {}", input.display());
                child.kill().await.context("Failed to kill FFmpeg process")?;
                (None, true)
            }
            Ended::TimedOut => {
                child.kill().await.context("Failed to kill stuck FFmpeg process")?;
                let stderr_tail = drain_stderr(stderr_handle).await;
                return Err(anyhow!(
                    "FFmpeg process timed out after {} seconds. Process was killed.\n{}",
                    timeout.map(|t| t.as_secs()).unwrap_or_default(),
                    stderr_tail
                ));
            }
        };

        let stderr_tail = drain_stderr(stderr_handle).await;
        Ok(Invocation {
            exit_code: status.and_then(|s| s.code()),
            cancelled,
            stderr_tail,
        })
    }
}

/// A killed process can leave grandchildren holding the pipe open
async fn drain_stderr(handle: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, handle).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            debug!("FFmpeg stderr still open after exit; tail dropped");
            String::new()
        }
    }
}

/// Completed and never-started jobs of one executor run
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Jobs that reached Succeeded or Failed
    pub finished: Vec<TranscodeJob>,
    /// Still Pending: the run was cancelled before they started
    pub abandoned: Vec<TranscodeJob>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TranscodeJob> {
        self.finished.iter().filter(|j| j.status == JobStatus::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TranscodeJob> {
        self.finished.iter().filter(|j| j.status == JobStatus::Failed)
    }
}

/// Drives transcode jobs through a bounded worker pool
#[derive(Clone)]
pub struct TranscodeExecutor {
    invoker: Arc<dyn ToolInvoker>,
    pool: WorkerPool,
}

impl TranscodeExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>, concurrency: usize) -> Self {
        Self {
            invoker,
            pool: WorkerPool::new(concurrency),
        }
    }

    /// Run every job to a terminal state. One failure never stops the others;
    /// there are no automatic retries.
    pub async fn run(&self, jobs: Vec<TranscodeJob>, cancel: &CancelToken) -> ExecutionReport {
        info!("Transcoding {} job(s), {} at a time", jobs.len(), self.pool.workers());
        let invoker = &self.invoker;
        let outcomes = self
            .pool
            .run(jobs, cancel, move |job, cancel| async move {
                run_job(&**invoker, job, &cancel).await
            })
            .await;

        let mut report = ExecutionReport::default();
        for outcome in outcomes {
            match outcome {
                PoolOutcome::Completed(job) => report.finished.push(job),
                PoolOutcome::Abandoned(job) => report.abandoned.push(job),
            }
        }

        info!(
            "Transcoding done: {} succeeded, {} failed, {} not started",
            report.succeeded().count(),
            report.failed().count(),
            report.abandoned.len()
        );
        report
    }
}

async fn run_job(invoker: &dyn ToolInvoker, mut job: TranscodeJob, cancel: &CancelToken) -> TranscodeJob {
    job.start();
    info!("Starting transcoding job {}: {}", job.id, job.input);

    if let Some(parent) = job.output_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let reason = format!("Failed to create output directory {}: {}", parent.display(), e);
            error!("❌ Job {} failed: {}", job.id, reason);
            job.finish(None, 0, Some(reason));
            return job;
        }
    }

    let started = Instant::now();
    let input = job.input.full_path();
    let result = invoker.invoke(&input, &job.output_path, cancel).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(inv) if inv.cancelled => {
            job.finish(inv.exit_code, elapsed_ms, Some("cancelled".to_string()));
        }
        Ok(inv) if inv.exit_code == Some(0) && !job.output_path.exists() => {
            job.finish(inv.exit_code, elapsed_ms, Some("tool exited 0 but wrote no output".to_string()));
        }
        Ok(inv) => {
            let failure = (inv.exit_code != Some(0)).then(|| {
                format!("exit code {}: {}", inv.exit_code.unwrap_or(-1), inv.stderr_tail.trim())
            });
            job.finish(inv.exit_code, elapsed_ms, failure);
        }
        Err(e) => {
            job.finish(None, elapsed_ms, Some(format!("{:#}", e)));
        }
    }

    match job.status {
        JobStatus::Succeeded => info!("✅ Job {} completed in {} ms", job.id, elapsed_ms),
        _ => {
            error!("❌ Job {} failed: {}", job.id, job.failure.as_deref().unwrap_or("unknown"));
            remove_partial_output(&job.output_path).await;
        }
    }
    job
}

/// Half-written outputs would pass for finished ones on a later verify
async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}

/// Fresh pending jobs for the Failed subset, for an operator-invoked re-run
pub fn retry_failed(jobs: &[TranscodeJob]) -> Vec<TranscodeJob> {
    jobs.iter()
        .filter(|j| j.status == JobStatus::Failed)
        .map(TranscodeJob::retry)
        .collect()
}
