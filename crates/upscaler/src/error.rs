use std::io;
use std::path::PathBuf;
use thiserror::Error;
use crate::job::Stage;

/// Model or preset lookup failure. Raised while building the run
/// configuration, before any job starts.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("unknown preset {preset} for model '{model}'")]
    UnknownPreset { model: String, preset: u32 },
    #[error("model '{0}' is a composite chain and has no presets")]
    NotSingleModel(String),
    #[error("model '{0}' is not a composite chain")]
    NotAChain(String),
}

/// External tool failure
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} {}", exit_label(.code))]
    Failure {
        program: String,
        code: Option<i32>,
        tail: Vec<String>,
    },
    #[error("{program} was cancelled")]
    Cancelled { program: String },
    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },
}

impl ProcessError {
    /// Only a tool that ran and exited unsuccessfully is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::Failure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }

    /// Last captured output lines, if the tool got far enough to produce any
    pub fn tail(&self) -> &[String] {
        match self {
            ProcessError::Failure { tail, .. } => tail,
            _ => &[],
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Dimension probing failure; the pipeline recovers from it
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe failed: {0}")]
    Process(#[from] ProcessError),
    #[error("malformed probe output {0:?}")]
    Malformed(String),
}

/// Failure of one file's pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} failed for {}: {source}", .path.display())]
    Stage {
        path: PathBuf,
        stage: Stage,
        #[source]
        source: ProcessError,
    },
    #[error("failed to create workspace for {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create destination directory {}: {source}", .path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remux produced no output at {}", .path.display())]
    MissingOutput { path: PathBuf },
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Stage { source, .. } if source.is_cancelled())
    }

    /// Captured tool output to print next to the failure
    pub fn tail(&self) -> &[String] {
        match self {
            PipelineError::Stage { source, .. } => source.tail(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_names_exit_code() {
        let err = ProcessError::Failure {
            program: "video2x".to_string(),
            code: Some(3),
            tail: vec!["out of memory".to_string()],
        };
        assert_eq!(err.to_string(), "video2x exited with code 3");
        assert!(err.is_retryable());
        assert_eq!(err.tail(), ["out of memory".to_string()]);
    }

    #[test]
    fn test_signal_termination_message() {
        let err = ProcessError::Failure {
            program: "ffmpeg".to_string(),
            code: None,
            tail: Vec::new(),
        };
        assert_eq!(err.to_string(), "ffmpeg was terminated by a signal");
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        let err = ProcessError::Cancelled { program: "video2x".to_string() };
        assert!(!err.is_retryable());

        let wrapped = PipelineError::Stage {
            path: PathBuf::from("/in/a.mkv"),
            stage: Stage::Remux,
            source: err,
        };
        assert!(wrapped.is_cancelled());
        assert!(wrapped.tail().is_empty());
    }
}
