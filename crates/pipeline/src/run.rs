use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use chrono::Utc;
use crate::config::PipelineConfig;
use crate::ffprobe::{FfprobeProber, Prober};
use crate::filter::PathFilter;
use crate::inventory::Inventory;
use crate::job::{JobStatus, TranscodeJob};
use crate::media::MediaPath;
use crate::plan::JobPlanner;
use crate::pool::{CancelToken, WorkerPool};
use crate::probe::MetadataProbe;
use crate::report::RunReport;
use crate::scan::{Discoverer, DiscoveryError};
use crate::transcode::{retry_failed, FfmpegInvoker, ToolInvoker, TranscodeExecutor};
use crate::verify::Verifier;
use log::{info, warn};

/// What discovery and probing produced
#[derive(Debug, Clone)]
pub struct Survey {
    pub discovered: usize,
    /// Every eligible file found, probed or not
    pub originals: HashSet<PathBuf>,
    pub diagnostics: Vec<DiscoveryError>,
    pub inventory: Inventory,
}

/// The whole discover → probe → plan → transcode → verify chain
pub struct Pipeline {
    cfg: PipelineConfig,
    prober: Arc<dyn Prober>,
    invoker: Arc<dyn ToolInvoker>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, prober: Arc<dyn Prober>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { cfg, prober, invoker }
    }

    /// Native ffprobe for inspection, native ffmpeg for transcoding
    pub fn with_ffmpeg(cfg: PipelineConfig) -> Self {
        let prober = Arc::new(FfprobeProber::new(&cfg.ffprobe_bin));
        let invoker = Arc::new(FfmpegInvoker::from_config(&cfg));
        Self::new(cfg, prober, invoker)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn discoverer(&self) -> Discoverer {
        Discoverer::new(PathFilter::from_config(&self.cfg))
    }

    pub fn planner(&self) -> JobPlanner {
        JobPlanner::from_config(&self.cfg)
    }

    fn metadata_probe(&self) -> MetadataProbe {
        MetadataProbe::new(Arc::clone(&self.prober))
    }

    /// Discover eligible files and probe each of them
    pub async fn survey(&self, cancel: &CancelToken) -> Result<Survey> {
        self.cfg.validate().context("Invalid configuration")?;

        let discoverer = self.discoverer();
        let mut discovery = discoverer.discover(&self.cfg.input_roots);
        let paths: Vec<MediaPath> = discovery.by_ref().collect();
        let diagnostics = discovery.into_diagnostics();
        info!(
            "Discovery found {} eligible file(s), {} unreadable location(s)",
            paths.len(),
            diagnostics.len()
        );

        let discovered = paths.len();
        let originals = paths.iter().map(|p| p.full_path()).collect();
        let inventory = Inventory::collect(
            paths,
            &self.metadata_probe(),
            WorkerPool::new(self.cfg.probe_workers()),
            cancel,
        )
        .await;

        Ok(Survey {
            discovered,
            originals,
            diagnostics,
            inventory,
        })
    }

    /// Plan jobs for a survey. A collision here aborts the run.
    pub fn plan(&self, survey: &Survey) -> Result<Vec<TranscodeJob>> {
        let candidates = survey.inventory.transcode_candidates(self.cfg.probe_failure_policy);
        let jobs = self
            .planner()
            .plan_guarded(&candidates, &survey.originals)
            .context("Planning failed; nothing was transcoded")?;
        Ok(jobs)
    }

    /// Full run: transcode every planned job, then verify the successes
    pub async fn run(&self, cancel: &CancelToken) -> Result<RunReport> {
        self.run_with_retries(cancel, 0).await
    }

    /// Like [`Pipeline::run`], but re-runs the Failed subset up to `retries`
    /// more times before verifying
    pub async fn run_with_retries(&self, cancel: &CancelToken, retries: u32) -> Result<RunReport> {
        let started_at = Utc::now();
        let survey = self.survey(cancel).await?;
        let jobs = self.plan(&survey)?;

        let executor = TranscodeExecutor::new(Arc::clone(&self.invoker), self.cfg.transcode_workers());
        let execution = executor.run(jobs, cancel).await;

        let mut jobs = execution.finished;
        jobs.extend(execution.abandoned);

        for round in 1..=retries {
            let again = retry_failed(&jobs);
            if again.is_empty() || cancel.is_cancelled() {
                break;
            }
            info!("Retry round {}: re-running {} failed job(s)", round, again.len());
            jobs.retain(|j| j.status != JobStatus::Failed);

            let execution = executor.run(again, cancel).await;
            jobs.extend(execution.finished);
            jobs.extend(execution.abandoned);
        }

        let verifications = self.verifier().verify_all(&jobs, cancel).await;
        Ok(self.report(started_at, survey, jobs, verifications, cancel))
    }

    /// Verify outputs already on disk from an earlier (possibly unfinished)
    /// run, without transcoding anything
    pub async fn verify_existing(&self, cancel: &CancelToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let survey = self.survey(cancel).await?;
        let mut jobs = self.plan(&survey)?;

        for job in &mut jobs {
            if job.output_path.is_file() {
                job.adopt_existing_output();
            }
        }
        let present = jobs.iter().filter(|j| j.status == JobStatus::Succeeded).count();
        info!("{} of {} planned output(s) already exist", present, jobs.len());

        let verifications = self.verifier().verify_all(&jobs, cancel).await;
        Ok(self.report(started_at, survey, jobs, verifications, cancel))
    }

    fn verifier(&self) -> Verifier {
        Verifier::new(self.metadata_probe(), self.cfg.fps_tolerance, self.cfg.verify_workers())
    }

    fn report(
        &self,
        started_at: chrono::DateTime<Utc>,
        survey: Survey,
        jobs: Vec<TranscodeJob>,
        verifications: Vec<crate::verify::VerificationRecord>,
        cancel: &CancelToken,
    ) -> RunReport {
        if cancel.is_cancelled() {
            warn!("Run was cancelled; report covers completed work only");
        }
        RunReport::new(
            started_at,
            survey.discovered,
            survey.diagnostics.iter().map(|d| d.to_string()).collect(),
            survey.inventory.summary(),
            jobs,
            verifications,
            cancel.is_cancelled(),
        )
    }
}
