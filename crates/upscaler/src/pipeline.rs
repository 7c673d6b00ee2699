use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use crate::catalog::{ChainStep, Preset, Processor};
use crate::command::{CommandBuilder, ToolCommand};
use crate::config::UpscaleConfig;
use crate::error::{PipelineError, ProcessError};
use crate::job::{save_job, FileJob, JobState, Stage};
use crate::probe::probe_dimensions;
use crate::process::{OutputMode, ToolRunner};
use crate::reporter::{Reporter, StageContext};
use crate::run_config::{ModelSelection, RunConfig};
use crate::workspace::JobWorkspace;

/// Drives one file through pre-process, upscale and remux
pub struct Pipeline {
    config: Arc<UpscaleConfig>,
    run: Arc<RunConfig>,
    builder: CommandBuilder,
    runner: Arc<dyn ToolRunner>,
    reporter: Arc<dyn Reporter>,
}

impl Pipeline {
    pub fn new(
        config: Arc<UpscaleConfig>,
        run: Arc<RunConfig>,
        runner: Arc<dyn ToolRunner>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let builder = CommandBuilder::new(&config);
        Pipeline { config, run, builder, runner, reporter }
    }

    pub fn config(&self) -> &UpscaleConfig {
        &self.config
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    /// Process one job to `Done` or `Failed`.
    ///
    /// The job's workspace is gone when this returns, whatever the outcome.
    pub async fn process(&self, job: &mut FileJob, cancel: &CancellationToken) -> Result<(), PipelineError> {
        job.start();
        info!("Job {}: Starting {}", job.short_id(), job.source_path.display());
        info!("Job {}: Model {}", job.short_id(), self.run.selection.describe());
        self.persist(job);

        let started = Instant::now();
        let result = self.process_in_workspace(job, cancel).await;

        match &result {
            Ok(()) => {
                job.transition(JobState::Done);
                info!(
                    "Job {}: ✅ Completed in {:.1}s -> {}",
                    job.short_id(),
                    started.elapsed().as_secs_f64(),
                    job.destination.display()
                );
            }
            Err(e) => {
                if e.is_cancelled() {
                    warn!("Job {}: Cancelled", job.short_id());
                } else {
                    error!("Job {}: ❌ {}", job.short_id(), e);
                    for line in e.tail() {
                        error!("Job {}:   | {}", job.short_id(), line);
                    }
                }
                job.fail(e.to_string());
            }
        }
        self.persist(job);

        result
    }

    async fn process_in_workspace(&self, job: &mut FileJob, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let workspace = JobWorkspace::create(self.config.temp_root.as_deref()).map_err(|source| {
            PipelineError::Workspace { path: job.source_path.clone(), source }
        })?;

        let outcome = self.run_stages(job, &workspace, cancel).await;

        // Cleanup trouble never replaces the job's own outcome
        if let Err(e) = workspace.release() {
            warn!("Job {}: Failed to remove workspace: {}", job.short_id(), e);
        }

        outcome
    }

    async fn run_stages(
        &self,
        job: &mut FileJob,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if let Some(parent) = job.destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PipelineError::Destination {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let input = self.preprocess(job, workspace, cancel).await?;
        job.transition(JobState::PreProcessed);
        self.persist(job);

        let upscaled = match &self.run.selection {
            ModelSelection::Single { processor, preset } => {
                self.upscale_single(job, *processor, preset, input, workspace, cancel).await?
            }
            ModelSelection::Chain { steps, .. } => self.upscale_chain(job, steps, input, workspace, cancel).await?,
        };

        // Muxed inside the workspace; the destination only ever sees a finished file
        let muxed = workspace.artifact(&format!("muxed.{}", self.config.container));
        let remux = self.builder.build_remux_command(&upscaled, &job.source_path, &muxed);
        self.execute(job, Stage::Remux, &remux, cancel).await?;

        let written = fs::metadata(&muxed).map(|m| m.len() > 0).unwrap_or(false);
        if !written {
            return Err(PipelineError::MissingOutput { path: muxed });
        }

        publish(&muxed, &job.destination).map_err(|source| PipelineError::Destination {
            path: job.destination.clone(),
            source,
        })?;
        job.transition(JobState::Muxed);
        self.persist(job);

        Ok(())
    }

    fn needs_preprocess(&self, source: &Path) -> bool {
        let in_container = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.config.container))
            .unwrap_or(false);
        self.config.preprocess.enabled && !in_container
    }

    /// Lossless re-encode into the target container, or the source as-is
    async fn preprocess(
        &self,
        job: &FileJob,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        if !self.needs_preprocess(&job.source_path) {
            debug!("Job {}: Source already in {} container", job.short_id(), self.config.container);
            return Ok(job.source_path.clone());
        }

        let output = workspace.artifact(&format!("source.{}", self.config.container));
        let command = self.builder.build_preprocess_command(&job.source_path, &output);
        self.execute(job, Stage::PreProcess, &command, cancel).await?;
        Ok(output)
    }

    async fn upscale_single(
        &self,
        job: &mut FileJob,
        processor: Processor,
        preset: &Preset,
        input: PathBuf,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let source_height = if self.run.needs_probe(processor) {
            match probe_dimensions(self.runner.as_ref(), &self.builder, &input).await {
                Ok(dimensions) => Some(dimensions.height),
                Err(e) => {
                    warn!("Job {}: Could not probe {}, keeping requested scale: {}", job.short_id(), input.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let step = self.run.resolve_single(
            processor,
            preset,
            source_height,
            self.config.max_clamped_scale,
            !self.config.preserve_streams,
        );
        let output = workspace.artifact(&format!("upscaled.{}", self.config.container));

        job.transition(JobState::Upscaling { step: 1, of: 1 });
        self.persist(job);
        info!("Job {}: Upscale parameters: {}", job.short_id(), step);

        let command = self.builder.build_upscale_command(&step, &input, &output);
        self.execute(job, Stage::Upscale { step: 1, of: 1 }, &command, cancel).await?;
        Ok(output)
    }

    /// Run every chain step in order, each reading the previous step's output
    async fn upscale_chain(
        &self,
        job: &mut FileJob,
        steps: &[ChainStep],
        input: PathBuf,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let total = steps.len();
        let mut current = input;

        for (index, chain_step) in steps.iter().enumerate() {
            let number = index + 1;
            let step = self.run.resolve_chain_step(chain_step, !self.config.preserve_streams);
            let output = workspace.artifact(&format!("step-{}.{}", number, self.config.container));

            job.transition(JobState::Upscaling { step: number, of: total });
            self.persist(job);
            info!("Job {}: Chain step {}/{} parameters: {}", job.short_id(), number, total, step);

            let command = self.builder.build_upscale_command(&step, &current, &output);
            self.execute(job, Stage::Upscale { step: number, of: total }, &command, cancel).await?;
            current = output;
        }

        Ok(current)
    }

    /// Run one stage, retrying a failed tool up to `retry_attempts` times
    async fn execute(
        &self,
        job: &FileJob,
        stage: Stage,
        command: &ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let ctx = StageContext {
            job_id: job.short_id().to_string(),
            file_name: job.file_name.clone(),
            stage,
        };
        let attempts = self.config.retry_attempts.saturating_add(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Stage {
                    path: job.source_path.clone(),
                    stage,
                    source: ProcessError::Cancelled { program: command.program_name() },
                });
            }

            info!("Job {}: Starting {} ({})", job.short_id(), stage, command.program_name());
            debug!("Job {}: {}", job.short_id(), command);
            let started = Instant::now();

            let outcome = self
                .runner
                .run(command, OutputMode::Streaming, self.reporter.clone(), ctx.clone(), cancel)
                .await;
            self.reporter.finish(&ctx);

            match outcome {
                Ok(()) => {
                    info!(
                        "Job {}: Finished {} in {:.1}s",
                        job.short_id(),
                        stage,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "Job {}: {} failed ({}), retrying ({}/{})",
                        job.short_id(),
                        stage,
                        e,
                        attempt,
                        attempts - 1
                    );
                    attempt += 1;
                }
                Err(source) => {
                    return Err(PipelineError::Stage {
                        path: job.source_path.clone(),
                        stage,
                        source,
                    });
                }
            }
        }
    }

    fn persist(&self, job: &FileJob) {
        if let Some(dir) = &self.config.job_state_dir {
            if let Err(e) = save_job(job, dir) {
                warn!("Job {}: Failed to save job state: {:#}", job.short_id(), e);
            }
        }
    }
}

/// Move a finished artifact to `destination`, copying when the rename
/// cannot cross filesystems. A failed copy leaves no destination behind.
fn publish(artifact: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(artifact, destination).is_ok() {
        return Ok(());
    }
    if let Err(e) = fs::copy(artifact, destination) {
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    fs::remove_file(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_moves_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("muxed.mp4");
        let destination = dir.path().join("clip.mp4");
        fs::write(&artifact, b"frames").unwrap();
        fs::write(&destination, b"stale").unwrap();

        publish(&artifact, &destination).unwrap();

        assert!(!artifact.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"frames");
    }

    #[test]
    fn test_publish_missing_artifact_leaves_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("clip.mp4");

        assert!(publish(&dir.path().join("muxed.mp4"), &destination).is_err());
        assert!(!destination.exists());
    }
}
