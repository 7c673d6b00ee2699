use std::fmt;
use std::path::{Path, PathBuf};
use crate::catalog::{Dimensions, Processor};
use crate::config::{EncoderSettings, ToolPaths, UpscaleConfig};
use crate::error::ProbeError;
use crate::paths::PathTranslation;

/// Program plus argument vector for one external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Short program name for logs and errors
    pub fn program_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Value following `flag`, if present
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Output size requested from the super-resolution tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Scale(u32),
    Dimensions(Dimensions),
    /// Keep the input resolution (frame interpolation)
    Native,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Scale(scale) => write!(f, "x{}", scale),
            Target::Dimensions(d) => write!(f, "{}", d),
            Target::Native => f.write_str("native"),
        }
    }
}

/// Every parameter of one super-resolution pass, after clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStep {
    pub processor: Processor,
    pub preset: &'static str,
    pub target: Target,
    pub noise_level: u32,
    pub threads: u32,
    pub frame_rate_mul: u32,
    pub lossless: bool,
    pub strip_streams: bool,
}

impl fmt::Display for ResolvedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} target={} noise={} threads={} fps-mul={} lossless={}",
            self.processor, self.preset, self.target, self.noise_level, self.threads, self.frame_rate_mul, self.lossless
        )
    }
}

/// Builds argument vectors for the external tools. Pure: no I/O, and the
/// same inputs always give the same vector.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    tools: ToolPaths,
    encoder: EncoderSettings,
    x264_preset: String,
    translation: PathTranslation,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new(config: &UpscaleConfig) -> Self {
        CommandBuilder {
            tools: config.tools.clone(),
            encoder: config.encoder.clone(),
            x264_preset: config.preprocess.x264_preset.clone(),
            translation: config.path_translation.clone(),
        }
    }

    fn path_arg(&self, path: &Path) -> String {
        self.translation.to_tool(path)
    }

    /// Build a super-resolution command
    ///
    /// Explicit width/height and a scale factor are mutually exclusive; the
    /// frame-rate multiplier and thread count are only passed when non-zero.
    pub fn build_upscale_command(&self, step: &ResolvedStep, input: &Path, output: &Path) -> ToolCommand {
        let mut args = Vec::new();

        args.push("-i".to_string());
        args.push(self.path_arg(input));

        args.push("-c".to_string());
        args.push(self.encoder.codec.clone());

        // Audio comes back in at remux time from the original file
        if step.strip_streams {
            args.push("--no-copy-streams".to_string());
        }

        args.push("-p".to_string());
        args.push(step.processor.name().to_string());
        args.push(step.processor.flag().to_string());
        args.push(step.preset.to_string());

        match step.target {
            Target::Dimensions(dimensions) => {
                args.push("-w".to_string());
                args.push(dimensions.width.to_string());
                args.push("-h".to_string());
                args.push(dimensions.height.to_string());
            }
            Target::Scale(scale) => {
                args.push("-s".to_string());
                args.push(scale.to_string());
            }
            Target::Native => {}
        }

        args.push("-n".to_string());
        args.push(step.noise_level.to_string());

        if step.frame_rate_mul > 0 {
            args.push("-m".to_string());
            args.push(step.frame_rate_mul.to_string());
        }

        if step.threads > 0 {
            args.push("-e".to_string());
            args.push(format!("threads={}", step.threads));
        }

        let options = if step.lossless {
            &self.encoder.lossless_options
        } else {
            &self.encoder.options
        };
        for option in options {
            args.push("-e".to_string());
            args.push(option.clone());
        }

        args.push("-o".to_string());
        args.push(self.path_arg(output));

        ToolCommand { program: self.tools.video2x.clone(), args }
    }

    /// Build the remux command: video copied from the processed file, audio
    /// re-encoded from the original.
    pub fn build_remux_command(&self, processed: &Path, original: &Path, output: &Path) -> ToolCommand {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            self.path_arg(processed),
            "-i".to_string(),
            self.path_arg(original),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            self.path_arg(output),
        ];

        ToolCommand { program: self.tools.ffmpeg.clone(), args }
    }

    /// Build the probe command printing `<width>x<height>` of the first video stream
    pub fn build_probe_command(&self, input: &Path) -> ToolCommand {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height".to_string(),
            "-of".to_string(),
            "csv=s=x:p=0".to_string(),
            self.path_arg(input),
        ];

        ToolCommand { program: self.tools.ffprobe.clone(), args }
    }

    /// Build the lossless re-encode of the first video stream; audio is dropped
    pub fn build_preprocess_command(&self, input: &Path, output: &Path) -> ToolCommand {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            self.path_arg(input),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.x264_preset.clone(),
            "-qp".to_string(),
            "0".to_string(),
            "-an".to_string(),
            self.path_arg(output),
        ];

        ToolCommand { program: self.tools.ffmpeg.clone(), args }
    }
}

/// Parse the probe's `<width>x<height>` line
pub fn parse_dimensions(output: &str) -> Result<Dimensions, ProbeError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ProbeError::Malformed(output.to_string()))?;

    let mut parts = line.split('x').filter(|p| !p.is_empty());
    let width = parts.next().and_then(|w| w.trim().parse::<u32>().ok());
    let height = parts.next().and_then(|h| h.trim().parse::<u32>().ok());

    match (width, height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok(Dimensions::new(width, height)),
        _ => Err(ProbeError::Malformed(output.to_string())),
    }
}
