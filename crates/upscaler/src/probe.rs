use std::path::Path;
use log::debug;
use crate::catalog::Dimensions;
use crate::command::{parse_dimensions, CommandBuilder};
use crate::error::{ProbeError, ProcessError};
use crate::process::ToolRunner;

/// Read the width and height of the first video stream
pub async fn probe_dimensions(
    runner: &dyn ToolRunner,
    builder: &CommandBuilder,
    input: &Path,
) -> Result<Dimensions, ProbeError> {
    let command = builder.build_probe_command(input);
    let output = runner.capture(&command).await?;

    if !output.success {
        return Err(ProcessError::Failure {
            program: command.program_name(),
            code: output.code,
            tail: output.stderr.lines().map(str::to_string).collect(),
        }
        .into());
    }

    let dimensions = parse_dimensions(&output.stdout)?;
    debug!("Probed {}: {}", input.display(), dimensions);
    Ok(dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use crate::command::ToolCommand;
    use crate::config::UpscaleConfig;
    use crate::process::{CapturedOutput, OutputMode};
    use crate::reporter::{Reporter, StageContext};

    struct FixedProbe {
        stdout: &'static str,
        code: i32,
    }

    #[async_trait]
    impl ToolRunner for FixedProbe {
        async fn run(
            &self,
            _command: &ToolCommand,
            _mode: OutputMode,
            _reporter: Arc<dyn Reporter>,
            _ctx: StageContext,
            _cancel: &CancellationToken,
        ) -> Result<(), ProcessError> {
            Ok(())
        }

        async fn capture(&self, _command: &ToolCommand) -> Result<CapturedOutput, ProcessError> {
            Ok(CapturedOutput {
                code: Some(self.code),
                success: self.code == 0,
                stdout: self.stdout.to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            })
        }
    }

    fn builder() -> CommandBuilder {
        CommandBuilder::new(&UpscaleConfig::default_config())
    }

    #[tokio::test]
    async fn test_probe_parses_dimensions() {
        let runner = FixedProbe { stdout: "1280x720\n", code: 0 };
        let dims = probe_dimensions(&runner, &builder(), Path::new("/in/a.mkv")).await.unwrap();
        assert_eq!(dims, Dimensions::new(1280, 720));
    }

    #[tokio::test]
    async fn test_probe_malformed_output() {
        let runner = FixedProbe { stdout: "N/A\n", code: 0 };
        let err = probe_dimensions(&runner, &builder(), Path::new("/in/a.mkv")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_probe_tool_failure() {
        let runner = FixedProbe { stdout: "", code: 1 };
        let err = probe_dimensions(&runner, &builder(), Path::new("/in/a.mkv")).await.unwrap_err();
        match err {
            ProbeError::Process(ProcessError::Failure { code, tail, .. }) => {
                assert_eq!(code, Some(1));
                assert_eq!(tail, vec!["Invalid data found when processing input"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
