use std::path::PathBuf;
use crate::catalog::{self, ChainStep, Dimensions, ModelSpec, Preset, Processor};
use crate::command::{ResolvedStep, Target};
use crate::error::CatalogError;

/// Parameters for one batch as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub model: ModelSpec,
    /// 1-based preset id; ignored for composite models
    pub preset: u32,
    pub scale: u32,
    pub noise_level: u32,
    pub hd: bool,
    pub fourk: bool,
    pub threads: u32,
    pub max_height: Option<u32>,
    pub frame_rate_mul: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            model: ModelSpec::RealEsrgan,
            preset: 1,
            scale: 4,
            noise_level: 3,
            hd: false,
            fourk: false,
            threads: 0,
            max_height: None,
            frame_rate_mul: 0,
        }
    }
}

/// What runs in the upscaling stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    Single { processor: Processor, preset: Preset },
    Chain { model: ModelSpec, steps: &'static [ChainStep] },
}

impl ModelSelection {
    pub fn describe(&self) -> String {
        match self {
            ModelSelection::Single { processor, preset } => format!("{} {}", processor, preset.label),
            ModelSelection::Chain { model, steps } => format!("{} ({} steps)", model.name(), steps.len()),
        }
    }
}

/// Fully resolved parameters for one batch; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub selection: ModelSelection,
    pub scale: u32,
    pub noise_level: u32,
    /// Fixed output size from `--hd`/`--fourk`
    pub dimensions: Option<Dimensions>,
    pub threads: u32,
    pub max_height: Option<u32>,
    pub frame_rate_mul: u32,
}

impl RunConfig {
    /// Resolve the model against the catalog. Fails before any work starts.
    pub fn resolve(source_dir: PathBuf, destination_dir: PathBuf, options: &RunOptions) -> Result<Self, CatalogError> {
        let selection = match options.model.processor() {
            Some(processor) => ModelSelection::Single {
                processor,
                preset: *catalog::resolve(options.model, options.preset)?,
            },
            None => ModelSelection::Chain {
                model: options.model,
                steps: catalog::expand_chain(options.model)?,
            },
        };

        // 4K wins when both overrides are given
        let dimensions = if options.fourk {
            Some(Dimensions::UHD)
        } else if options.hd {
            Some(Dimensions::HD)
        } else {
            None
        };

        Ok(RunConfig {
            source_dir,
            destination_dir,
            selection,
            scale: options.scale,
            noise_level: options.noise_level,
            dimensions,
            threads: options.threads,
            max_height: options.max_height,
            frame_rate_mul: options.frame_rate_mul,
        })
    }

    /// Whether the single-model pass will emit a scale factor that the
    /// max-height cap could reduce
    pub fn needs_probe(&self, processor: Processor) -> bool {
        self.max_height.is_some() && matches!(self.single_target(processor), Target::Scale(_))
    }

    fn single_target(&self, processor: Processor) -> Target {
        if !processor.accepts_scale() {
            return Target::Native;
        }
        match self.dimensions {
            Some(dimensions) if processor.accepts_dimensions() => Target::Dimensions(dimensions),
            _ => Target::Scale(self.scale),
        }
    }

    /// Parameters for a single-model pass. `source_height` is the probed
    /// height of the pass input, when known.
    pub fn resolve_single(
        &self,
        processor: Processor,
        preset: &Preset,
        source_height: Option<u32>,
        max_clamped_scale: u32,
        strip_streams: bool,
    ) -> ResolvedStep {
        let target = match self.single_target(processor) {
            Target::Scale(requested) => {
                let capped = match (self.max_height, source_height) {
                    (Some(max_height), Some(height)) => cap_scale_for_height(requested, height, max_height, max_clamped_scale),
                    _ => requested,
                };
                Target::Scale(preset.constraint.clamp_scale(capped))
            }
            other => other,
        };

        ResolvedStep {
            processor,
            preset: preset.label,
            target,
            noise_level: preset.constraint.clamp_noise(self.noise_level),
            threads: self.threads,
            frame_rate_mul: self.frame_rate_mul,
            lossless: false,
            strip_streams,
        }
    }

    /// Parameters for one step of a composite chain
    pub fn resolve_chain_step(&self, step: &ChainStep, strip_streams: bool) -> ResolvedStep {
        let target = match (step.dimensions, step.scale) {
            (Some(dimensions), _) if step.processor.accepts_dimensions() => Target::Dimensions(dimensions),
            (_, Some(scale)) if step.processor.accepts_scale() => Target::Scale(step.preset.constraint.clamp_scale(scale)),
            _ => Target::Native,
        };

        ResolvedStep {
            processor: step.processor,
            preset: step.preset.label,
            target,
            noise_level: step.preset.constraint.clamp_noise(self.noise_level),
            threads: self.threads,
            frame_rate_mul: self.frame_rate_mul,
            lossless: step.lossless,
            strip_streams,
        }
    }
}

/// Reduce a scale factor so `scale * source_height` stays within `max_height`.
///
/// Only applies when the requested output would exceed the cap; the result is
/// `floor(max_height / source_height)` limited to `ceiling`, and never below 1.
pub fn cap_scale_for_height(requested: u32, source_height: u32, max_height: u32, ceiling: u32) -> u32 {
    if source_height == 0 {
        return requested;
    }
    if u64::from(requested) * u64::from(source_height) <= u64::from(max_height) {
        return requested;
    }
    (max_height / source_height).min(ceiling).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(options: RunOptions) -> RunConfig {
        RunConfig::resolve(PathBuf::from("/in"), PathBuf::from("/out"), &options).unwrap()
    }

    fn single(config: &RunConfig) -> (Processor, Preset) {
        match &config.selection {
            ModelSelection::Single { processor, preset } => (*processor, *preset),
            other => panic!("expected single model, got {:?}", other),
        }
    }

    #[test]
    fn test_gan_scale_clamped_to_preset_maximum() {
        let config = run(RunOptions { scale: 8, ..Default::default() });
        let (processor, preset) = single(&config);
        let step = config.resolve_single(processor, &preset, None, 4, true);
        assert_eq!(step.target, Target::Scale(4));
        assert_eq!(step.preset, "realesr-animevideov3");
    }

    #[test]
    fn test_shader_hd_override_uses_dimensions() {
        let config = run(RunOptions { model: ModelSpec::Libplacebo, preset: 2, hd: true, ..Default::default() });
        let (processor, preset) = single(&config);
        let step = config.resolve_single(processor, &preset, None, 4, true);
        assert_eq!(step.target, Target::Dimensions(Dimensions::new(1920, 1080)));
        assert!(!config.needs_probe(processor));
    }

    #[test]
    fn test_fourk_wins_over_hd() {
        let config = run(RunOptions { model: ModelSpec::Libplacebo, hd: true, fourk: true, ..Default::default() });
        assert_eq!(config.dimensions, Some(Dimensions::UHD));
    }

    #[test]
    fn test_gan_ignores_dimension_override() {
        let config = run(RunOptions { hd: true, scale: 2, ..Default::default() });
        let (processor, preset) = single(&config);
        let step = config.resolve_single(processor, &preset, None, 4, true);
        assert_eq!(step.target, Target::Scale(2));
    }

    #[test]
    fn test_rife_keeps_native_resolution() {
        let config = run(RunOptions { model: ModelSpec::Rife, preset: 10, frame_rate_mul: 2, max_height: Some(1080), ..Default::default() });
        let (processor, preset) = single(&config);
        assert!(!config.needs_probe(processor));
        let step = config.resolve_single(processor, &preset, Some(720), 4, true);
        assert_eq!(step.target, Target::Native);
        assert_eq!(step.frame_rate_mul, 2);
    }

    #[test]
    fn test_height_cap_reduces_scale() {
        let config = run(RunOptions { max_height: Some(2160), ..Default::default() });
        let (processor, preset) = single(&config);
        assert!(config.needs_probe(processor));
        // 4 x 720 = 2880 > 2160, floor(2160 / 720) = 3
        let step = config.resolve_single(processor, &preset, Some(720), 4, true);
        assert_eq!(step.target, Target::Scale(3));
        // No probe result: requested scale goes through
        let step = config.resolve_single(processor, &preset, None, 4, true);
        assert_eq!(step.target, Target::Scale(4));
    }

    #[test]
    fn test_height_cap_then_preset_minimum() {
        // realesrgan-plus only supports x4, so the preset bound wins
        let config = run(RunOptions { preset: 3, max_height: Some(1080), ..Default::default() });
        let (processor, preset) = single(&config);
        let step = config.resolve_single(processor, &preset, Some(540), 4, true);
        assert_eq!(step.target, Target::Scale(4));
    }

    #[test]
    fn test_noise_clamped_for_realcugan() {
        let config = run(RunOptions { model: ModelSpec::RealCugan, preset: 1, noise_level: 3, scale: 4, ..Default::default() });
        let (processor, preset) = single(&config);
        let step = config.resolve_single(processor, &preset, None, 4, true);
        assert_eq!(step.noise_level, 0);
        assert_eq!(step.target, Target::Scale(2));
    }

    #[test]
    fn test_unknown_preset_fails_resolution() {
        let err = RunConfig::resolve(PathBuf::from("/in"), PathBuf::from("/out"), &RunOptions { preset: 42, ..Default::default() }).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownPreset { preset: 42, .. }));
    }

    #[test]
    fn test_chain_steps_resolve_from_step_definition() {
        let config = run(RunOptions { model: ModelSpec::Lib2Real, scale: 2, hd: true, ..Default::default() });
        let ModelSelection::Chain { steps, .. } = config.selection else {
            panic!("expected chain");
        };

        let first = config.resolve_chain_step(&steps[0], true);
        assert_eq!(first.target, Target::Dimensions(Dimensions::new(960, 540)));
        assert!(first.lossless);

        let second = config.resolve_chain_step(&steps[1], true);
        assert_eq!(second.target, Target::Scale(4));
        assert!(!second.lossless);
    }

    #[test]
    fn test_cap_examples() {
        assert_eq!(cap_scale_for_height(4, 1080, 2160, 4), 2);
        assert_eq!(cap_scale_for_height(2, 1080, 2160, 4), 2);
        assert_eq!(cap_scale_for_height(8, 240, 2160, 4), 4);
        assert_eq!(cap_scale_for_height(4, 2160, 1080, 4), 1);
        assert_eq!(cap_scale_for_height(4, 0, 1080, 4), 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn test_height_cap_is_idempotent(
            requested in 1u32..16,
            height in 1u32..4320,
            max_height in 1u32..8640,
            ceiling in 1u32..8,
        ) {
            let once = cap_scale_for_height(requested, height, max_height, ceiling);
            let twice = cap_scale_for_height(once, height, max_height, ceiling);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_height_cap_never_raises_scale(
            requested in 1u32..16,
            height in 1u32..4320,
            max_height in 1u32..8640,
        ) {
            let capped = cap_scale_for_height(requested, height, max_height, 4);
            prop_assert!(capped <= requested.max(1));
            if capped < requested && height <= max_height {
                prop_assert!(capped * height <= max_height);
            }
        }
    }
}
