use std::collections::VecDeque;
use std::future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::command::ToolCommand;
use crate::config::UpscaleConfig;
use crate::error::ProcessError;
use crate::reporter::{OutputEvent, ProgressSample, Reporter, StageContext, StreamKind};

/// What happens to a tool's output while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Lines are forwarded to the reporter as they arrive
    Streaming,
    /// Output is discarded; only the exit status matters
    Silent,
}

/// Result of a tool run whose output is collected in full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Launches external tools
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion. Fails on a non-zero exit, cancellation or timeout.
    async fn run(
        &self,
        command: &ToolCommand,
        mode: OutputMode,
        reporter: Arc<dyn Reporter>,
        ctx: StageContext,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError>;

    /// Run and collect stdout and stderr; the exit status is left to the caller
    async fn capture(&self, command: &ToolCommand) -> Result<CapturedOutput, ProcessError>;
}

/// `ToolRunner` backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    markers: Vec<String>,
    tail_lines: usize,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(markers: Vec<String>, tail_lines: usize, timeout: Option<Duration>) -> Self {
        ProcessRunner { markers, tail_lines, timeout }
    }

    pub fn from_config(config: &UpscaleConfig) -> Self {
        Self::new(config.progress_markers.clone(), config.failure_tail_lines, config.process_timeout())
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        command: &ToolCommand,
        mode: OutputMode,
        reporter: Arc<dyn Reporter>,
        ctx: StageContext,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let program = command.program_name();
        debug!("Executing: {}", command);

        let (stdout_cfg, stderr_cfg) = match mode {
            OutputMode::Streaming => (Stdio::piped(), Stdio::piped()),
            OutputMode::Silent => (Stdio::null(), Stdio::null()),
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout_cfg)
            .stderr(stderr_cfg)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn { program: program.clone(), source })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_lines(stdout, StreamKind::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_lines(stderr, StreamKind::Stderr, tx.clone())));
        }
        drop(tx);

        let collector = tokio::spawn(collect_events(rx, reporter, ctx, self.markers.clone(), self.tail_lines));

        let abort_handles: Vec<_> = drains.iter().map(|d| d.abort_handle()).collect();
        let work = async {
            for drain in drains {
                let _ = drain.await;
            }
            child.wait().await
        };
        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = work => Ok(status),
            _ = cancel.cancelled() => Err(ProcessError::Cancelled { program: program.clone() }),
            _ = deadline => Err(ProcessError::TimedOut {
                program: program.clone(),
                secs: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
        };

        let status = match outcome {
            Ok(status) => status.map_err(|source| ProcessError::Wait { program: program.clone(), source })?,
            Err(err) => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill {}: {}", program, e);
                }
                for handle in &abort_handles {
                    handle.abort();
                }
                collector.abort();
                return Err(err);
            }
        };

        let tail = collector.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Failure {
                program,
                code: status.code(),
                tail: tail.into_iter().collect(),
            })
        }
    }

    async fn capture(&self, command: &ToolCommand) -> Result<CapturedOutput, ProcessError> {
        let program = command.program_name();
        debug!("Executing: {}", command);

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProcessError::Spawn { program, source })?;

        Ok(CapturedOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Read a stream line by line, splitting on `\n` and on the bare `\r` used by
/// progress bars. Undecodable bytes are replaced. Keeps reading after the
/// receiver is gone so the child never blocks on a full pipe.
async fn drain_lines<R>(stream: R, kind: StreamKind, tx: mpsc::UnboundedSender<(StreamKind, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Stopped reading {}: {}", kind, e);
                break;
            }
        };
        let len = chunk.len();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut line, kind, &tx);
            } else {
                line.push(byte);
            }
        }
        reader.consume(len);
    }

    flush_line(&mut line, kind, &tx);
}

fn flush_line(line: &mut Vec<u8>, kind: StreamKind, tx: &mpsc::UnboundedSender<(StreamKind, String)>) {
    if line.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(line).trim_end().to_string();
    line.clear();
    if !text.is_empty() {
        let _ = tx.send((kind, text));
    }
}

/// Forward every line to the reporter in arrival order and keep the last
/// `tail_lines` non-progress lines for failure reports.
async fn collect_events(
    mut rx: mpsc::UnboundedReceiver<(StreamKind, String)>,
    reporter: Arc<dyn Reporter>,
    ctx: StageContext,
    markers: Vec<String>,
    tail_lines: usize,
) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(tail_lines);

    while let Some((stream, line)) = rx.recv().await {
        if let Some(sample) = parse_progress(&line, markers.as_slice()) {
            reporter.report(&ctx, &OutputEvent::Progress(sample));
            continue;
        }

        reporter.report(&ctx, &OutputEvent::Log { stream, line: line.clone() });
        if tail_lines > 0 {
            if tail.len() == tail_lines {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    tail
}

/// Parse a progress line: a line starting with one of `markers` carries a
/// percentage as its first decimal number.
pub fn parse_progress<S: AsRef<str>>(line: &str, markers: &[S]) -> Option<ProgressSample> {
    let line = line.trim_start();
    let rest = markers
        .iter()
        .find_map(|m| line.strip_prefix(m.as_ref()))?;

    let start = rest.find(|c: char| c.is_ascii_digit())?;
    let digits = &rest[start..];
    // Longest decimal prefix: digits with at most one dot
    let mut seen_dot = false;
    let end = digits
        .find(|c: char| match c {
            '.' if !seen_dot => {
                seen_dot = true;
                false
            }
            c => !c.is_ascii_digit(),
        })
        .unwrap_or(digits.len());
    let number = digits[..end].trim_end_matches('.');

    number.parse::<f64>().ok().map(ProgressSample::from_percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PROGRESS_MARKERS;

    #[test]
    fn test_parse_progress_marker_lines() {
        let markers = DEFAULT_PROGRESS_MARKERS;
        assert_eq!(parse_progress("PROGRESS: 42.5%", markers), Some(ProgressSample::from_percent(42.5)));
        assert_eq!(parse_progress("  Progress: frame 10/20 50%", markers), Some(ProgressSample::from_percent(10.0)));
        assert_eq!(parse_progress("PROGRESS:100", markers).map(|s| s.fraction), Some(1.0));
        assert_eq!(parse_progress("Progress: 250%", markers).map(|s| s.fraction), Some(1.0));
        assert_eq!(parse_progress("PROGRESS: 7.%", markers).map(|s| s.fraction), Some(0.07));
        assert_eq!(parse_progress("PROGRESS: 12.5.4%", markers), Some(ProgressSample::from_percent(12.5)));
        assert_eq!(parse_progress("Progress: 3..", markers).map(|s| s.fraction), Some(0.03));
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        let markers = DEFAULT_PROGRESS_MARKERS;
        assert_eq!(parse_progress("frame=  100 fps=25 PROGRESS: 10%", markers), None);
        assert_eq!(parse_progress("PROGRESS: done", markers), None);
        assert_eq!(parse_progress("", markers), None);
        assert_eq!(parse_progress("[PROGRESS] 10", &["[PROGRESS]"][..]).map(|s| s.fraction), Some(0.1));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::path::PathBuf;
        use std::sync::Mutex;
        use crate::job::Stage;

        #[derive(Default)]
        struct Recorder {
            events: Mutex<Vec<OutputEvent>>,
        }

        impl Reporter for Recorder {
            fn report(&self, _ctx: &StageContext, event: &OutputEvent) {
                self.events.lock().unwrap().push(event.clone());
            }
        }

        fn sh(script: &str) -> ToolCommand {
            ToolCommand {
                program: PathBuf::from("sh"),
                args: vec!["-c".to_string(), script.to_string()],
            }
        }

        fn ctx() -> StageContext {
            StageContext {
                job_id: "deadbeef".to_string(),
                file_name: "clip.mkv".to_string(),
                stage: Stage::Upscale { step: 1, of: 1 },
            }
        }

        fn runner() -> ProcessRunner {
            ProcessRunner::new(vec!["PROGRESS:".to_string()], 3, None)
        }

        #[tokio::test]
        async fn test_streaming_reports_progress_and_lines_in_order() {
            let recorder = Arc::new(Recorder::default());
            let script = "echo starting; printf 'PROGRESS: 25%%\\rPROGRESS: 50%%\\r'; echo 'PROGRESS: 100%'";
            runner()
                .run(&sh(script), OutputMode::Streaming, recorder.clone(), ctx(), &CancellationToken::new())
                .await
                .unwrap();

            let events = recorder.events.lock().unwrap();
            assert_eq!(
                events[0],
                OutputEvent::Log { stream: StreamKind::Stdout, line: "starting".to_string() }
            );
            let progress: Vec<f64> = events
                .iter()
                .filter_map(|e| match e {
                    OutputEvent::Progress(s) => Some(s.fraction),
                    _ => None,
                })
                .collect();
            assert_eq!(progress, vec![0.25, 0.5, 1.0]);
        }

        #[tokio::test]
        async fn test_failure_keeps_output_tail() {
            let recorder = Arc::new(Recorder::default());
            let script = "for i in 1 2 3 4 5; do echo line$i >&2; done; exit 3";
            let err = runner()
                .run(&sh(script), OutputMode::Streaming, recorder, ctx(), &CancellationToken::new())
                .await
                .unwrap_err();

            match err {
                ProcessError::Failure { program, code, tail } => {
                    assert_eq!(program, "sh");
                    assert_eq!(code, Some(3));
                    assert_eq!(tail, vec!["line3", "line4", "line5"]);
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_silent_mode_only_reports_status() {
            let recorder = Arc::new(Recorder::default());
            runner()
                .run(&sh("echo hidden; exit 0"), OutputMode::Silent, recorder.clone(), ctx(), &CancellationToken::new())
                .await
                .unwrap();
            assert!(recorder.events.lock().unwrap().is_empty());

            let err = runner()
                .run(&sh("exit 1"), OutputMode::Silent, recorder, ctx(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn test_missing_program_is_a_spawn_error() {
            let cmd = ToolCommand {
                program: PathBuf::from("/nonexistent/video2x"),
                args: Vec::new(),
            };
            let err = runner()
                .run(&cmd, OutputMode::Streaming, Arc::new(Recorder::default()), ctx(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ProcessError::Spawn { .. }));
            assert!(!err.is_retryable());
        }

        #[tokio::test]
        async fn test_capture_collects_output() {
            let output = runner().capture(&sh("echo 1920x1080; echo warn >&2; exit 2")).await.unwrap();
            assert_eq!(output.stdout.trim(), "1920x1080");
            assert_eq!(output.stderr.trim(), "warn");
            assert_eq!(output.code, Some(2));
            assert!(!output.success);
        }

        #[tokio::test]
        async fn test_cancellation_kills_child() {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let started = std::time::Instant::now();
            let err = runner()
                .run(&sh("sleep 30"), OutputMode::Streaming, Arc::new(Recorder::default()), ctx(), &cancel)
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let runner = ProcessRunner::new(Vec::new(), 0, Some(Duration::from_millis(200)));
            let err = runner
                .run(&sh("sleep 30"), OutputMode::Silent, Arc::new(Recorder::default()), ctx(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ProcessError::TimedOut { .. }));
        }
    }
}
