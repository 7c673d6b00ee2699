pub mod batch;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod paths;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod reporter;
pub mod run_config;
pub mod workspace;

pub use batch::{discover, plan_jobs, run_batch, sweep_runs, BatchSummary};
pub use catalog::{Dimensions, ModelSpec, Preset, Processor};
pub use command::{CommandBuilder, ResolvedStep, Target, ToolCommand};
pub use config::UpscaleConfig;
pub use error::{CatalogError, PipelineError, ProbeError, ProcessError};
pub use job::{FileJob, JobState, Stage};
pub use paths::PathTranslation;
pub use pipeline::Pipeline;
pub use process::{OutputMode, ProcessRunner, ToolRunner};
pub use reporter::{LogReporter, OutputEvent, Reporter, StageContext};
pub use run_config::{ModelSelection, RunConfig, RunOptions};
