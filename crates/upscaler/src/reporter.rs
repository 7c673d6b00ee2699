use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use log::{debug, info};
use crate::job::Stage;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Completion of a running tool, in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub fraction: f64,
}

impl ProgressSample {
    pub fn from_percent(percent: f64) -> Self {
        ProgressSample {
            fraction: (percent / 100.0).clamp(0.0, 1.0),
        }
    }

    pub fn percent(&self) -> f64 {
        self.fraction * 100.0
    }
}

/// One observation from a running tool
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Progress(ProgressSample),
    Log { stream: StreamKind, line: String },
}

/// Which job and stage an event belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub job_id: String,
    pub file_name: String,
    pub stage: Stage,
}

impl fmt::Display for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.job_id, self.file_name, self.stage)
    }
}

/// Sink for progress and log lines of running tools.
///
/// Called from a single collector task per tool invocation, so events of one
/// invocation arrive in order.
pub trait Reporter: Send + Sync {
    fn report(&self, ctx: &StageContext, event: &OutputEvent);

    /// One invocation of the stage is over, whatever its outcome
    fn finish(&self, _ctx: &StageContext) {}
}

/// Reporter writing to the `log` facade; progress is throttled to one line
/// per `step` percent per job stage.
pub struct LogReporter {
    step: u32,
    last: Mutex<HashMap<(String, String), u32>>,
}

impl LogReporter {
    pub fn new(step: u32) -> Self {
        LogReporter {
            step: step.max(1),
            last: Mutex::new(HashMap::new()),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<(String, String), u32>> {
        match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn should_log(&self, ctx: &StageContext, percent: u32) -> bool {
        let bucket = percent / self.step * self.step;
        let key = (ctx.job_id.clone(), ctx.stage.to_string());
        let mut last = self.buckets();
        match last.get(&key) {
            Some(&seen) if seen >= bucket => false,
            _ => {
                last.insert(key, bucket);
                true
            }
        }
    }
}

impl Reporter for LogReporter {
    fn report(&self, ctx: &StageContext, event: &OutputEvent) {
        match event {
            OutputEvent::Progress(sample) => {
                let percent = sample.percent().floor() as u32;
                if self.should_log(ctx, percent) {
                    info!("{} {:.1}%", ctx, sample.percent());
                }
            }
            OutputEvent::Log { stream, line } => {
                debug!("{} {}: {}", ctx, stream, line);
            }
        }
    }

    fn finish(&self, ctx: &StageContext) {
        self.buckets().remove(&(ctx.job_id.clone(), ctx.stage.to_string()));
    }
}
