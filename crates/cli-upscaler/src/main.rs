use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use upscaler::{
    batch::{plan_jobs, run_batch, sweep_runs, BatchSummary},
    catalog::{self, ModelSpec, PresetConstraint},
    config::UpscaleConfig,
    job::{load_all_jobs, FileJob, JobState},
    pipeline::Pipeline,
    process::{ProcessRunner, ToolRunner},
    reporter::{LogReporter, Reporter},
    run_config::{RunConfig, RunOptions},
};

/// Batch video upscaler driving video2x and ffmpeg
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upscale every file of a directory with one model
    Run(RunArgs),
    /// Run every preset of every single model into OUTPUT/<model>/<preset>/
    Sweep(SweepArgs),
    /// List models and their presets
    Models,
    /// Show the job records of the configured state directory
    Status,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Source directory
    #[arg(short, long)]
    input: String,

    /// Destination directory
    #[arg(short, long)]
    output: String,

    /// Model id or name
    #[arg(short, long, default_value = "realesrgan")]
    model: ModelSpec,

    /// Preset id within the model
    #[arg(short = 't', long, default_value_t = 1)]
    preset: u32,

    /// Scale factor
    #[arg(short, long, default_value_t = 4)]
    scale: u32,

    /// Noise level
    #[arg(short, long, default_value_t = 3)]
    noise_level: u32,

    /// Fixed 1920x1080 output (shader models only)
    #[arg(long)]
    hd: bool,

    /// Fixed 3840x2160 output (shader models only); wins over --hd
    #[arg(long)]
    fourk: bool,

    /// Encoder threads, 0 lets the encoder decide
    #[arg(long, default_value_t = 0)]
    threads: u32,

    /// Reduce the scale so the output stays within this height
    #[arg(long)]
    max_height: Option<u32>,

    /// Frame-rate multiplier for interpolation models
    #[arg(long, default_value_t = 0)]
    frame_rate_mul: u32,

    #[command(flatten)]
    batch: BatchArgs,
}

#[derive(ClapArgs, Debug)]
struct SweepArgs {
    /// Source directory
    #[arg(short, long)]
    input: String,

    /// Destination directory
    #[arg(short, long)]
    output: String,

    /// Noise level
    #[arg(short, long, default_value_t = 3)]
    noise_level: u32,

    #[command(flatten)]
    batch: BatchArgs,
}

/// Overrides for the batch settings of the configuration file
#[derive(ClapArgs, Debug)]
struct BatchArgs {
    /// Files processed at the same time
    #[arg(long)]
    jobs: Option<usize>,

    /// Seconds to wait between files
    #[arg(long)]
    delay: Option<u64>,

    /// Extra attempts for a failed tool run
    #[arg(long)]
    retries: Option<u32>,

    /// Only pick up files with these extensions (comma separated)
    #[arg(long, value_delimiter = ',')]
    ext: Vec<String>,

    /// Mirror the source tree instead of flattening
    #[arg(long)]
    preserve_tree: bool,
}

impl BatchArgs {
    fn apply(&self, cfg: &mut UpscaleConfig) {
        if let Some(jobs) = self.jobs {
            cfg.max_concurrent_jobs = jobs.max(1);
        }
        if let Some(delay) = self.delay {
            cfg.inter_job_delay_secs = delay;
        }
        if let Some(retries) = self.retries {
            cfg.retry_attempts = retries;
        }
        if !self.ext.is_empty() {
            cfg.include_extensions = self.ext.clone();
        }
        if self.preserve_tree {
            cfg.preserve_tree = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    let cfg = UpscaleConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command {
        Commands::Run(run) => run_command(cfg, run).await,
        Commands::Sweep(sweep) => sweep_command(cfg, sweep).await,
        Commands::Models => {
            print_models();
            Ok(())
        }
        Commands::Status => status_command(&cfg),
    }
}

async fn run_command(mut cfg: UpscaleConfig, args: RunArgs) -> Result<()> {
    args.batch.apply(&mut cfg);
    let (source, destination) = resolve_dirs(&cfg, &args.input, &args.output)?;

    let options = RunOptions {
        model: args.model,
        preset: args.preset,
        scale: args.scale,
        noise_level: args.noise_level,
        hd: args.hd,
        fourk: args.fourk,
        threads: args.threads,
        max_height: args.max_height,
        frame_rate_mul: args.frame_rate_mul,
    };
    let run = RunConfig::resolve(source, destination, &options).context("Invalid model selection")?;

    log_settings(&cfg, &run);

    let cfg = Arc::new(cfg);
    let (runner, reporter) = tool_handles(&cfg);
    let cancel = cancel_on_ctrl_c();

    let pipeline = Arc::new(Pipeline::new(cfg.clone(), Arc::new(run), runner, reporter));
    let jobs = plan_jobs(pipeline.run_config(), &cfg);
    if jobs.is_empty() {
        warn!("No input files found in {}", pipeline.run_config().source_dir.display());
        return Ok(());
    }

    let summary = run_batch(pipeline, jobs, cancel).await;
    finish(&summary)
}

async fn sweep_command(mut cfg: UpscaleConfig, args: SweepArgs) -> Result<()> {
    args.batch.apply(&mut cfg);
    let (source, destination) = resolve_dirs(&cfg, &args.input, &args.output)?;

    let runs = sweep_runs(&source, &destination, args.noise_level).context("Failed to build sweep")?;
    info!("Sweeping {} model presets over {}", runs.len(), source.display());

    let cfg = Arc::new(cfg);
    let (runner, reporter) = tool_handles(&cfg);
    let cancel = cancel_on_ctrl_c();
    let mut total = BatchSummary::default();

    for run in runs {
        if cancel.is_cancelled() {
            break;
        }
        info!("Sweep: {} -> {}", run.selection.describe(), run.destination_dir.display());

        let pipeline = Arc::new(Pipeline::new(cfg.clone(), Arc::new(run), runner.clone(), reporter.clone()));
        let jobs = plan_jobs(pipeline.run_config(), &cfg);
        let summary = run_batch(pipeline, jobs, cancel.clone()).await;

        total.succeeded += summary.succeeded;
        total.failed += summary.failed;
        total.cancelled += summary.cancelled;
        total.jobs.extend(summary.jobs);
    }

    finish(&total)
}

fn resolve_dirs(cfg: &UpscaleConfig, input: &str, output: &str) -> Result<(PathBuf, PathBuf)> {
    let source = cfg.path_translation.to_host(input);
    let destination = cfg.path_translation.to_host(output);

    if !source.is_dir() {
        bail!("Input directory does not exist: {}", source.display());
    }
    std::fs::create_dir_all(&destination)
        .with_context(|| format!("Failed to create output directory: {}", destination.display()))?;

    Ok((source, destination))
}

fn tool_handles(cfg: &UpscaleConfig) -> (Arc<dyn ToolRunner>, Arc<dyn Reporter>) {
    let runner: Arc<dyn ToolRunner> = Arc::new(ProcessRunner::from_config(cfg));
    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter::new(cfg.progress_log_step));
    (runner, reporter)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running tools and cleaning up...");
            trigger.cancel();
        }
    });
    cancel
}

fn log_settings(cfg: &UpscaleConfig, run: &RunConfig) {
    info!("Video upscaler starting");
    info!("  Input: {}", run.source_dir.display());
    info!("  Output: {}", run.destination_dir.display());
    info!("  Model: {}", run.selection.describe());
    info!("  Scale: {}, noise: {}", run.scale, run.noise_level);
    if let Some(dimensions) = run.dimensions {
        info!("  Fixed size: {}", dimensions);
    }
    if let Some(max_height) = run.max_height {
        info!("  Max height: {}", max_height);
    }
    info!("  video2x: {}", cfg.tools.video2x.display());
    info!("  ffmpeg: {}", cfg.tools.ffmpeg.display());
    info!("  Jobs: {}, delay: {}s", cfg.max_concurrent_jobs, cfg.inter_job_delay_secs);
}

fn finish(summary: &BatchSummary) -> Result<()> {
    for job in summary.jobs.iter().filter(|j| j.reason.is_some()) {
        warn!("{}: {}", job.source_path.display(), job.reason.as_deref().unwrap_or_default());
    }
    if summary.all_succeeded() {
        info!("✅ {} file(s) upscaled", summary.succeeded);
        Ok(())
    } else {
        bail!(
            "{} of {} file(s) did not complete ({} failed, {} cancelled)",
            summary.failed + summary.cancelled,
            summary.total(),
            summary.failed,
            summary.cancelled
        )
    }
}

fn status_command(cfg: &UpscaleConfig) -> Result<()> {
    let Some(dir) = &cfg.job_state_dir else {
        bail!("No job_state_dir configured, job records are not kept");
    };
    let jobs = load_all_jobs(dir).context("Failed to load jobs")?;
    if jobs.is_empty() {
        println!("No jobs in {}", dir.display());
        return Ok(());
    }

    for job in &jobs {
        println!("{}", job_line(job));
    }
    let done = jobs.iter().filter(|j| j.state == JobState::Done).count();
    let failed = jobs.iter().filter(|j| j.state == JobState::Failed).count();
    println!(
        "{} job(s): {} done, {} failed, {} unfinished",
        jobs.len(),
        done,
        failed,
        jobs.len() - done - failed
    );
    Ok(())
}

fn job_line(job: &FileJob) -> String {
    let mut line = format!("{}  {:<14} {}", job.short_id(), job.state.to_string(), job.source_path.display());
    if let Some(reason) = &job.reason {
        line.push_str(&format!("  ({})", reason));
    }
    line
}

fn describe_constraint(constraint: &PresetConstraint) -> String {
    let mut parts = Vec::new();
    match (constraint.min_scale, constraint.max_scale) {
        (Some(min), Some(max)) if min == max => parts.push(format!("x{}", max)),
        (Some(min), Some(max)) => parts.push(format!("x{}-x{}", min, max)),
        (None, Some(max)) => parts.push(format!("up to x{}", max)),
        (Some(min), None) => parts.push(format!("from x{}", min)),
        (None, None) => {}
    }
    if let Some(noise) = constraint.max_noise_level {
        parts.push(format!("noise <= {}", noise));
    }
    parts.join(", ")
}

fn print_models() {
    for model in ModelSpec::ALL {
        println!("{}", model);
        match catalog::expand_chain(model) {
            Ok(steps) => {
                for (index, step) in steps.iter().enumerate() {
                    let target = match (step.dimensions, step.scale) {
                        (Some(dimensions), _) => dimensions.to_string(),
                        (_, Some(scale)) => format!("x{}", scale),
                        _ => "native".to_string(),
                    };
                    println!("  step {}: {} {} ({})", index + 1, step.processor, step.preset.label, target);
                }
            }
            Err(_) => {
                for preset in catalog::presets(model) {
                    let limits = describe_constraint(&preset.constraint);
                    if limits.is_empty() {
                        println!("  {:>2}  {}", preset.id, preset.label);
                    } else {
                        println!("  {:>2}  {}  ({})", preset.id, preset.label, limits);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_line_shows_state_and_reason() {
        let mut job = FileJob::new(PathBuf::from("/v/a.mkv"), PathBuf::from("/o/a.mp4"));
        job.transition(JobState::Upscaling { step: 1, of: 2 });
        let line = job_line(&job);
        assert!(line.starts_with(job.short_id()));
        assert!(line.contains("upscaling 1/2"));
        assert!(line.ends_with("/v/a.mkv"));

        job.fail("remux failed".to_string());
        assert!(job_line(&job).ends_with("/v/a.mkv  (remux failed)"));
    }

    #[test]
    fn test_status_requires_state_dir() {
        let cfg = UpscaleConfig::default_config();
        assert!(status_command(&cfg).is_err());
    }

    #[test]
    fn test_status_reads_saved_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = FileJob::new(PathBuf::from("/v/a.mkv"), PathBuf::from("/o/a.mp4"));
        job.transition(JobState::Done);
        upscaler::job::save_job(&job, dir.path()).unwrap();

        let mut cfg = UpscaleConfig::default_config();
        cfg.job_state_dir = Some(dir.path().to_path_buf());
        assert!(status_command(&cfg).is_ok());
    }
}
