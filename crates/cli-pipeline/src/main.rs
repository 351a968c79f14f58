use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humansize::{format_size, DECIMAL};
use log::{error, info, warn, LevelFilter};
use pipeline::{
    script::render_script, CancelToken, FfmpegInvoker, Pipeline, PipelineConfig, PlanningError,
    RunReport, Survey,
};
use std::path::PathBuf;

/// Batch transcoder for archived video collections
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Input root to scan (repeatable; replaces configured roots)
    #[arg(long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// Output root for transcoded files
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Number of concurrent transcodes
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count every file extension under the roots
    Census,
    /// Discover and probe eligible files, then print the inventory
    Inventory,
    /// Plan jobs without running them
    Plan {
        /// Write the plan as a bash script instead of listing it
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Transcode everything planned, then verify the outputs
    Run {
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Re-run failed jobs this many more times
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Verify outputs left by an earlier run without transcoding
    Verify {
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins unless --verbose asks for debug
    let mut logger = env_logger::Builder::from_default_env();
    logger.format_timestamp_secs();
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
    }
    logger.init();

    let mut cfg = PipelineConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if !args.roots.is_empty() {
        cfg.input_roots = args.roots.clone();
    }
    if let Some(output) = &args.output {
        cfg.output_root = output.clone();
    }
    if let Some(n) = args.concurrency {
        cfg.transcode_concurrency = n;
    }

    info!("Configuration loaded:");
    info!("  Input roots: {:?}", cfg.input_roots);
    info!("  Output root: {}", cfg.output_root.display());
    info!("  Extensions: {:?}", cfg.extensions);
    info!("  Concurrency: {} transcode, {} probe", cfg.transcode_workers(), cfg.probe_workers());

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping running transcodes");
                cancel.cancel();
            }
        });
    }

    let pipeline = Pipeline::with_ffmpeg(cfg);

    let result = match args.command {
        Command::Census => census(&pipeline),
        Command::Inventory => {
            let survey = pipeline.survey(&cancel).await?;
            print_survey(&survey);
            Ok(())
        }
        Command::Plan { script } => plan(&pipeline, &cancel, script).await,
        Command::Run { report, retries } => {
            let outcome = pipeline.run_with_retries(&cancel, retries).await;
            finish(outcome, report)
        }
        Command::Verify { report } => {
            let outcome = pipeline.verify_existing(&cancel).await;
            finish(outcome, report)
        }
    };

    if let Err(e) = &result {
        if let Some(planning) = e.downcast_ref::<PlanningError>() {
            error!("No jobs were run: {}", planning);
        }
    }
    result
}

fn census(pipeline: &Pipeline) -> Result<()> {
    let roots = &pipeline.config().input_roots;
    anyhow::ensure!(!roots.is_empty(), "No input roots configured");

    let counts = pipeline.discoverer().extension_census(roots);
    let mut rows: Vec<_> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (ext, n) in rows {
        println!("{:>8}  {}", n, ext);
    }
    Ok(())
}

async fn plan(pipeline: &Pipeline, cancel: &CancelToken, script: Option<PathBuf>) -> Result<()> {
    let survey = pipeline.survey(cancel).await?;
    let jobs = pipeline.plan(&survey)?;

    match script {
        Some(path) => {
            let invoker = FfmpegInvoker::from_config(pipeline.config());
            std::fs::write(&path, render_script(&jobs, &invoker))
                .with_context(|| format!("Failed to write script: {}", path.display()))?;
            info!("Wrote {} job(s) to {}", jobs.len(), path.display());
        }
        None => {
            for job in &jobs {
                println!("{} -> {}", job.input.full_path().display(), job.output_path.display());
            }
            println!("{} job(s) planned", jobs.len());
        }
    }
    Ok(())
}

fn finish(outcome: Result<RunReport>, report_path: Option<PathBuf>) -> Result<()> {
    let report = outcome?;
    print_report(&report);
    if let Some(path) = report_path {
        report.write_json(&path)?;
        info!("Run report written to {}", path.display());
    }
    if report.counts.failed > 0 || report.counts.verified_inconsistent > 0 {
        anyhow::bail!(
            "{} job(s) failed, {} output(s) inconsistent",
            report.counts.failed,
            report.counts.verified_inconsistent
        );
    }
    Ok(())
}

fn print_survey(survey: &Survey) {
    let summary = survey.inventory.summary();
    println!("Discovered: {} file(s)", survey.discovered);
    println!("Probed:     {} file(s), {}", summary.total_files, format_size(summary.total_size_bytes, DECIMAL));
    println!(
        "Duration:   {:.1} h over {} file(s) with known length",
        summary.total_duration_seconds / 3600.0,
        summary.files_with_duration
    );
    for (dims, n) in &summary.by_dimension {
        println!("  {:>12}  {}", dims.to_string(), n);
    }
    for (ext, n) in &summary.by_extension {
        println!("  {:>12}  {}", ext, n);
    }
    for anomaly in &summary.anomalies {
        println!("  ! {} {}: {}", anomaly.path, anomaly.reason, anomaly.detail);
    }
    for diag in &survey.diagnostics {
        println!("  ? {}", diag);
    }
}

fn print_report(report: &RunReport) {
    let c = &report.counts;
    println!("Discovered: {}", c.discovered);
    println!("Planned:    {}", c.planned);
    println!("Succeeded:  {}", c.succeeded);
    if c.already_present > 0 {
        println!("Present:    {} (from an earlier run)", c.already_present);
    }
    println!("Failed:     {}", c.failed);
    if c.not_started > 0 {
        println!("Not run:    {}", c.not_started);
    }
    println!("Verified:   {} consistent, {} inconsistent", c.verified_consistent, c.verified_inconsistent);

    for job in report.jobs.iter().filter(|j| j.failure.is_some()) {
        println!("  FAILED {}: {}", job.input, job.failure.as_deref().unwrap_or_default());
    }
    for v in report.verifications.iter().filter(|v| !v.consistent) {
        println!("  MISMATCH {}: {:?} {}", v.job.input, v.deltas, v.notes.join("; "));
    }

    let (before, after) = report
        .verifications
        .iter()
        .filter_map(|v| Some((v.original.as_ref()?.size_bytes, v.transcoded.as_ref()?.size_bytes)))
        .fold((0u64, 0u64), |(b, a), (o, t)| (b + o, a + t));
    if before > 0 {
        println!(
            "Size:       {} -> {} ({:.0}%)",
            format_size(before, DECIMAL),
            format_size(after, DECIMAL),
            after as f64 / before as f64 * 100.0
        );
    }
    if report.cancelled {
        println!("Run was cancelled before all jobs finished");
    }
}
