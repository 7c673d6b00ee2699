use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use crate::catalog::{self, ModelSpec};
use crate::config::UpscaleConfig;
use crate::error::CatalogError;
use crate::job::FileJob;
use crate::pipeline::Pipeline;
use crate::run_config::{RunConfig, RunOptions};

/// Every regular file under `root`, sorted. An empty filter takes every
/// extension; otherwise extensions are compared case-insensitively.
pub fn discover(root: &Path, include_extensions: &[String]) -> Vec<PathBuf> {
    let wanted: HashSet<String> = include_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !wanted.is_empty() {
            let ext = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_lowercase());
            match ext {
                Some(ext) if wanted.contains(&ext) => {}
                _ => continue,
            }
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    files
}

/// Output path for `source`: the file name with the container extension,
/// directly under `destination_dir`, or under the same relative directory as
/// in `root` when `preserve_tree` is set.
pub fn destination_for(
    root: &Path,
    source: &Path,
    destination_dir: &Path,
    container: &str,
    preserve_tree: bool,
) -> PathBuf {
    let file_name = source
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_default()
        .with_extension(container);

    let parent = if preserve_tree {
        source
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|rel| destination_dir.join(rel))
            .unwrap_or_else(|| destination_dir.to_path_buf())
    } else {
        destination_dir.to_path_buf()
    };

    parent.join(file_name)
}

/// One job per discovered file of the run's source directory
pub fn plan_jobs(run: &RunConfig, config: &UpscaleConfig) -> Vec<FileJob> {
    let mut seen = HashSet::new();
    discover(&run.source_dir, &config.include_extensions)
        .into_iter()
        .map(|source| {
            let destination = destination_for(
                &run.source_dir,
                &source,
                &run.destination_dir,
                &config.container,
                config.preserve_tree,
            );
            if !seen.insert(destination.clone()) {
                warn!(
                    "{} maps onto an output already claimed by another file: {}",
                    source.display(),
                    destination.display()
                );
            }
            FileJob::new(source, destination)
        })
        .collect()
}

/// One run per preset of every single-family model, each writing into
/// `<destination>/<model>/<preset>/` at scale 4
pub fn sweep_runs(source_dir: &Path, destination_dir: &Path, noise_level: u32) -> Result<Vec<RunConfig>, CatalogError> {
    let mut runs = Vec::new();
    for model in ModelSpec::ALL.into_iter().filter(|m| !m.is_chain()) {
        for preset in catalog::presets(model) {
            let options = RunOptions {
                model,
                preset: preset.id,
                scale: 4,
                noise_level,
                ..Default::default()
            };
            let out_dir = destination_dir.join(model.name()).join(preset.label);
            runs.push(RunConfig::resolve(source_dir.to_path_buf(), out_dir, &options)?);
        }
    }
    Ok(runs)
}

/// Final outcome of each job of a batch
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Cancelled while running, or never started because of cancellation
    pub cancelled: usize,
    pub jobs: Vec<FileJob>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    fn record(&mut self, job: FileJob, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
        self.jobs.push(job);
    }

    fn merge(&mut self, other: BatchSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.jobs.extend(other.jobs);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

async fn run_job(pipeline: &Pipeline, job: &mut FileJob, cancel: &CancellationToken) -> Outcome {
    match pipeline.process(job, cancel).await {
        Ok(()) => Outcome::Succeeded,
        Err(e) if e.is_cancelled() => Outcome::Cancelled,
        Err(_) => Outcome::Failed,
    }
}

/// Wait out the settling delay; false when cancelled first
async fn settle(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Run every job. A failed job never stops the batch; cancellation stops
/// new jobs from starting.
pub async fn run_batch(pipeline: Arc<Pipeline>, jobs: Vec<FileJob>, cancel: CancellationToken) -> BatchSummary {
    let total = jobs.len();
    let max_jobs = pipeline.config().max_concurrent_jobs.max(1);
    info!("Starting batch of {} file(s), {} at a time", total, max_jobs);

    let mut summary = if max_jobs == 1 {
        run_sequential(&pipeline, jobs, &cancel).await
    } else {
        run_concurrent(pipeline, jobs, max_jobs, &cancel).await
    };

    summary.jobs.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    info!(
        "Batch complete: {} succeeded, {} failed, {} cancelled (of {})",
        summary.succeeded, summary.failed, summary.cancelled, total
    );
    summary
}

async fn run_sequential(pipeline: &Pipeline, jobs: Vec<FileJob>, cancel: &CancellationToken) -> BatchSummary {
    let delay = pipeline.config().inter_job_delay();
    let total = jobs.len();
    let mut summary = BatchSummary::default();

    for (index, mut job) in jobs.into_iter().enumerate() {
        if index > 0 && !settle(delay, cancel).await {
            summary.record(job, Outcome::Cancelled);
            continue;
        }
        if cancel.is_cancelled() {
            summary.record(job, Outcome::Cancelled);
            continue;
        }

        info!("File {}/{}: {}", index + 1, total, job.source_path.display());
        let outcome = run_job(pipeline, &mut job, cancel).await;
        summary.record(job, outcome);
    }

    summary
}

async fn run_concurrent(
    pipeline: Arc<Pipeline>,
    jobs: Vec<FileJob>,
    max_jobs: usize,
    cancel: &CancellationToken,
) -> BatchSummary {
    let delay = pipeline.config().inter_job_delay();
    let semaphore = Arc::new(Semaphore::new(max_jobs));
    let mut set = JoinSet::new();
    let mut summary = BatchSummary::default();

    for job in jobs {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => {
                    summary.record(job, Outcome::Cancelled);
                    continue;
                }
            },
            _ = cancel.cancelled() => {
                summary.record(job, Outcome::Cancelled);
                continue;
            }
        };

        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let mut job = job;
            let outcome = run_job(&pipeline, &mut job, &cancel).await;
            // The slot stays taken until the tool has settled
            settle(delay, &cancel).await;
            drop(permit);
            let mut done = BatchSummary::default();
            done.record(job, outcome);
            done
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(done) => summary.merge(done),
            Err(e) => {
                error!("Batch task failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_discover_walks_tree_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.mkv"));
        touch(&dir.path().join("a.avi"));
        touch(&dir.path().join("season1").join("ep01.MKV"));
        touch(&dir.path().join("season1").join("notes.txt"));

        let all = discover(dir.path(), &[]);
        assert_eq!(all.len(), 4);
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);

        let videos = discover(dir.path(), &["mkv".to_string(), ".avi".to_string()]);
        assert_eq!(
            videos,
            vec![
                dir.path().join("a.avi"),
                dir.path().join("b.mkv"),
                dir.path().join("season1").join("ep01.MKV"),
            ]
        );
    }

    #[test]
    fn test_discover_missing_root_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("absent"), &[]).is_empty());
    }

    #[test]
    fn test_destination_flattened_with_container_extension() {
        let dest = destination_for(
            Path::new("/in"),
            Path::new("/in/season1/ep01.mkv"),
            Path::new("/out"),
            "mp4",
            false,
        );
        assert_eq!(dest, PathBuf::from("/out/ep01.mp4"));
    }

    #[test]
    fn test_destination_mirrors_tree() {
        let dest = destination_for(
            Path::new("/in"),
            Path::new("/in/season1/ep01.avi"),
            Path::new("/out"),
            "mp4",
            true,
        );
        assert_eq!(dest, PathBuf::from("/out/season1/ep01.mp4"));
    }

    #[test]
    fn test_destination_keeps_inner_dots() {
        let dest = destination_for(Path::new("/in"), Path::new("/in/show.s01e01.mkv"), Path::new("/out"), "mp4", false);
        assert_eq!(dest, PathBuf::from("/out/show.s01e01.mp4"));
    }

    #[test]
    fn test_plan_jobs_uses_run_directories() {
        let src = tempfile::tempdir().unwrap();
        touch(&src.path().join("clip.mkv"));
        let run = RunConfig::resolve(src.path().to_path_buf(), PathBuf::from("/out"), &RunOptions::default()).unwrap();

        let jobs = plan_jobs(&run, &UpscaleConfig::default_config());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].destination, PathBuf::from("/out/clip.mp4"));
        assert_eq!(jobs[0].file_name, "clip.mkv");
    }

    #[test]
    fn test_sweep_covers_every_single_model_preset() {
        let runs = sweep_runs(Path::new("/in"), Path::new("/out"), 3).unwrap();
        let expected: usize = ModelSpec::ALL
            .iter()
            .filter(|m| !m.is_chain())
            .map(|m| catalog::presets(*m).len())
            .sum();
        assert_eq!(runs.len(), expected);
        assert!(runs.iter().all(|r| r.scale == 4 && r.noise_level == 3));
        assert_eq!(runs[0].destination_dir, PathBuf::from("/out/realesrgan/realesr-animevideov3"));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = BatchSummary::default();
        let job = || FileJob::new(PathBuf::from("/in/a.mkv"), PathBuf::from("/out/a.mp4"));
        summary.record(job(), Outcome::Succeeded);
        summary.record(job(), Outcome::Failed);
        summary.record(job(), Outcome::Cancelled);
        assert_eq!(summary.total(), 3);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.jobs.len(), 3);
    }
}
