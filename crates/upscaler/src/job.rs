use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position of a job in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    Created,
    PreProcessed,
    Upscaling { step: usize, of: usize },
    Muxed,
    Done,
    Failed,
}

impl JobState {
    /// `Done` and `Failed` are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => f.write_str("created"),
            JobState::PreProcessed => f.write_str("pre-processed"),
            JobState::Upscaling { step, of } => write!(f, "upscaling {}/{}", step, of),
            JobState::Muxed => f.write_str("muxed"),
            JobState::Done => f.write_str("done"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// External tool invocation within a job, used in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum Stage {
    PreProcess,
    Upscale { step: usize, of: usize },
    Remux,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PreProcess => f.write_str("pre-process"),
            Stage::Upscale { step, of } if *of > 1 => write!(f, "upscale {}/{}", step, of),
            Stage::Upscale { .. } => f.write_str("upscale"),
            Stage::Remux => f.write_str("remux"),
        }
    }
}

/// One discovered input file and the record of its pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJob {
    pub id: String,
    /// Directory the file was discovered in
    pub root: PathBuf,
    pub file_name: String,
    pub source_path: PathBuf,
    pub destination: PathBuf,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl FileJob {
    pub fn new(source_path: PathBuf, destination: PathBuf) -> Self {
        let root = source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        FileJob {
            id: Uuid::new_v4().to_string(),
            root,
            file_name,
            source_path,
            destination,
            state: JobState::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    /// First block of the uuid, enough to tell jobs apart in logs
    pub fn short_id(&self) -> &str {
        self.id.split('-').next().unwrap_or(&self.id)
    }

    pub fn start(&mut self) {
        self.state = JobState::Created;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.reason = None;
    }

    pub fn transition(&mut self, state: JobState) {
        self.state = state;
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self, reason: String) {
        self.reason = Some(reason);
        self.transition(JobState::Failed);
    }
}

fn job_file(job_id: &str, dir: &Path) -> PathBuf {
    dir.join(format!("{}.json", job_id))
}

/// Persist a job record as `<dir>/<id>.json`
pub fn save_job(job: &FileJob, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create job state directory: {}", dir.display()))?;
    let path = job_file(&job.id, dir);
    let json = serde_json::to_string_pretty(job).context("Failed to serialize job")?;
    fs::write(&path, json)
        .with_context(|| format!("Failed to write job file: {}", path.display()))?;
    Ok(())
}

/// Load every job record in a state directory, oldest first
pub fn load_all_jobs(dir: &Path) -> Result<Vec<FileJob>> {
    let mut jobs = Vec::new();
    if !dir.exists() {
        return Ok(jobs);
    }

    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read job state directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        let job: FileJob = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse job file: {}", path.display()))?;
        jobs.push(job);
    }

    jobs.sort_by_key(|j| j.created_at);
    Ok(jobs)
}
