use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::paths::PathTranslation;

/// Hard ceiling for a scale factor reduced by the max-height cap
pub const DEFAULT_MAX_CLAMPED_SCALE: u32 = 4;
/// Settling time between jobs so the GPU tool can release its resources
pub const DEFAULT_INTER_JOB_DELAY_SECS: u64 = 10;
/// Line prefixes the super-resolution tool uses for progress output
pub const DEFAULT_PROGRESS_MARKERS: &[&str] = &["PROGRESS:", "Progress:"];

/// Locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub video2x: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl ToolPaths {
    /// The Windows installer puts everything under
    /// `%LOCALAPPDATA%\Programs\video2x`; elsewhere the tools are on `PATH`.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            if let Some(local) = std::env::var_os("LOCALAPPDATA") {
                return Self::under_install_dir(&Path::new(&local).join("Programs").join("video2x"));
            }
        }
        ToolPaths {
            video2x: PathBuf::from("video2x"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    /// Layout of a bundled video2x install with its own ffmpeg
    pub fn under_install_dir(dir: &Path) -> Self {
        let ffmpeg_bin = dir.join("ffmpeg").join("bin");
        ToolPaths {
            video2x: dir.join("video2x"),
            ffmpeg: ffmpeg_bin.join("ffmpeg"),
            ffprobe: ffmpeg_bin.join("ffprobe"),
        }
    }
}

/// Encoder used by the super-resolution tool for its output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub codec: String,
    /// `-e key=value` options for regular passes
    pub options: Vec<String>,
    /// `-e key=value` options for passes whose output feeds another pass
    pub lossless_options: Vec<String>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        EncoderSettings {
            codec: "h264_nvenc".to_string(),
            options: vec!["preset=p7".to_string(), "tune=hq".to_string()],
            lossless_options: vec!["preset=p7".to_string(), "tune=lossless".to_string()],
        }
    }
}

/// Lossless re-encode applied to sources not already in the target container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessSettings {
    pub enabled: bool,
    /// x264 speed preset; quality is fixed at `-qp 0`
    pub x264_preset: String,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        PreprocessSettings {
            enabled: true,
            x264_preset: "ultrafast".to_string(),
        }
    }
}

/// Configuration for the upscaling pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleConfig {
    pub tools: ToolPaths,
    pub path_translation: PathTranslation,
    /// Extension (without dot) of every output file
    pub container: String,
    pub encoder: EncoderSettings,
    pub preprocess: PreprocessSettings,
    /// Keep audio/subtitle streams in upscaled intermediates
    pub preserve_streams: bool,
    pub progress_markers: Vec<String>,
    pub max_clamped_scale: u32,
    pub inter_job_delay_secs: u64,
    pub max_concurrent_jobs: usize,
    /// Kill a tool that runs longer than this
    pub process_timeout_secs: Option<u64>,
    /// Extra attempts for a stage whose tool exited unsuccessfully
    pub retry_attempts: u32,
    /// Output lines kept for failure reports
    pub failure_tail_lines: usize,
    /// Log progress every N percent
    pub progress_log_step: u32,
    /// Parent of per-job workspaces (system temp dir when unset)
    pub temp_root: Option<PathBuf>,
    /// Lowercase extensions to pick up; empty takes every file
    pub include_extensions: Vec<String>,
    /// Mirror the input tree under the output directory instead of flattening
    pub preserve_tree: bool,
    /// Directory where job state JSON files are written
    pub job_state_dir: Option<PathBuf>,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl UpscaleConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            tools: ToolPaths::platform_default(),
            path_translation: PathTranslation::Native,
            container: "mp4".to_string(),
            encoder: EncoderSettings::default(),
            preprocess: PreprocessSettings::default(),
            preserve_streams: false,
            progress_markers: DEFAULT_PROGRESS_MARKERS.iter().map(|m| m.to_string()).collect(),
            max_clamped_scale: DEFAULT_MAX_CLAMPED_SCALE,
            inter_job_delay_secs: DEFAULT_INTER_JOB_DELAY_SECS,
            max_concurrent_jobs: 1,
            process_timeout_secs: None,
            retry_attempts: 0,
            failure_tail_lines: 20,
            progress_log_step: 10,
            temp_root: None,
            include_extensions: Vec::new(),
            preserve_tree: false,
            job_state_dir: None,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_secs(self.inter_job_delay_secs)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}
