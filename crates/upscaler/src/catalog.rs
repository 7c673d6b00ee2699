use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::CatalogError;

/// Output frame size requested from a dimension-capable processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// 1920x1080, selected by `--hd`
    pub const HD: Dimensions = Dimensions::new(1920, 1080);
    /// 3840x2160, selected by `--fourk`
    pub const UHD: Dimensions = Dimensions::new(3840, 2160);

    pub const fn new(width: u32, height: u32) -> Self {
        Dimensions { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Processor family understood by the super-resolution tool (`-p <name>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    RealEsrgan,
    Libplacebo,
    RealCugan,
    Rife,
}

impl Processor {
    pub const ALL: [Processor; 4] = [
        Processor::RealEsrgan,
        Processor::Libplacebo,
        Processor::RealCugan,
        Processor::Rife,
    ];

    /// Name passed to `-p`
    pub fn name(self) -> &'static str {
        match self {
            Processor::RealEsrgan => "realesrgan",
            Processor::Libplacebo => "libplacebo",
            Processor::RealCugan => "realcugan",
            Processor::Rife => "rife",
        }
    }

    /// Flag that carries the preset label for this family
    pub fn flag(self) -> &'static str {
        match self {
            Processor::RealEsrgan => "--realesrgan-model",
            Processor::Libplacebo => "--libplacebo-shader",
            Processor::RealCugan => "--realcugan-model",
            Processor::Rife => "--rife-model",
        }
    }

    /// Shader upscaling renders to any output size; the GAN families only
    /// support integer scale factors.
    pub fn accepts_dimensions(self) -> bool {
        matches!(self, Processor::Libplacebo)
    }

    /// Frame interpolation keeps the source resolution.
    pub fn accepts_scale(self) -> bool {
        !matches!(self, Processor::Rife)
    }

    /// The `ModelSpec` that exposes this family on its own
    pub fn model(self) -> ModelSpec {
        match self {
            Processor::RealEsrgan => ModelSpec::RealEsrgan,
            Processor::Libplacebo => ModelSpec::Libplacebo,
            Processor::RealCugan => ModelSpec::RealCugan,
            Processor::Rife => ModelSpec::Rife,
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Model selectable on the command line: a single processor family or a
/// composite chain of several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSpec {
    RealEsrgan,
    Libplacebo,
    RealCugan,
    Rife,
    Lib2Real,
}

impl ModelSpec {
    pub const ALL: [ModelSpec; 5] = [
        ModelSpec::RealEsrgan,
        ModelSpec::Libplacebo,
        ModelSpec::RealCugan,
        ModelSpec::Rife,
        ModelSpec::Lib2Real,
    ];

    /// Stable numeric id, accepted on the command line in place of the name
    pub fn id(self) -> u32 {
        match self {
            ModelSpec::RealEsrgan => 1,
            ModelSpec::Libplacebo => 2,
            ModelSpec::RealCugan => 3,
            ModelSpec::Rife => 4,
            ModelSpec::Lib2Real => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelSpec::RealEsrgan => "realesrgan",
            ModelSpec::Libplacebo => "libplacebo",
            ModelSpec::RealCugan => "realcugan",
            ModelSpec::Rife => "rife",
            ModelSpec::Lib2Real => "lib2real",
        }
    }

    /// Processor family, or `None` for a composite chain
    pub fn processor(self) -> Option<Processor> {
        match self {
            ModelSpec::RealEsrgan => Some(Processor::RealEsrgan),
            ModelSpec::Libplacebo => Some(Processor::Libplacebo),
            ModelSpec::RealCugan => Some(Processor::RealCugan),
            ModelSpec::Rife => Some(Processor::Rife),
            ModelSpec::Lib2Real => None,
        }
    }

    pub fn is_chain(self) -> bool {
        self.processor().is_none()
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id(), self.name())
    }
}

impl FromStr for ModelSpec {
    type Err = CatalogError;

    /// Accepts the numeric id or the case-insensitive name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if let Ok(id) = wanted.parse::<u32>() {
            return ModelSpec::ALL
                .into_iter()
                .find(|m| m.id() == id)
                .ok_or_else(|| CatalogError::UnknownModel(wanted.to_string()));
        }
        ModelSpec::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CatalogError::UnknownModel(wanted.to_string()))
    }
}

/// Optional numeric bounds attached to a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresetConstraint {
    pub max_scale: Option<u32>,
    pub min_scale: Option<u32>,
    pub max_noise_level: Option<u32>,
}

impl PresetConstraint {
    pub const NONE: PresetConstraint = PresetConstraint {
        max_scale: None,
        min_scale: None,
        max_noise_level: None,
    };

    pub const fn scale(min: u32, max: u32) -> Self {
        PresetConstraint {
            max_scale: Some(max),
            min_scale: Some(min),
            max_noise_level: None,
        }
    }

    pub const fn with_max_noise(self, max: u32) -> Self {
        PresetConstraint {
            max_noise_level: Some(max),
            ..self
        }
    }

    /// Saturate a requested scale into `[min_scale, max_scale]`
    pub fn clamp_scale(&self, scale: u32) -> u32 {
        let mut clamped = scale;
        if let Some(max) = self.max_scale {
            clamped = clamped.min(max);
        }
        if let Some(min) = self.min_scale {
            clamped = clamped.max(min);
        }
        clamped
    }

    /// Saturate a requested noise level into `[0, max_noise_level]`
    pub fn clamp_noise(&self, noise: u32) -> u32 {
        match self.max_noise_level {
            Some(max) => noise.min(max),
            None => noise,
        }
    }
}

/// One selectable preset of a processor family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub id: u32,
    pub label: &'static str,
    pub constraint: PresetConstraint,
}

impl Preset {
    const fn new(id: u32, label: &'static str, constraint: PresetConstraint) -> Self {
        Preset { id, label, constraint }
    }
}

/// One pass of a composite model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStep {
    pub processor: Processor,
    pub preset: Preset,
    pub scale: Option<u32>,
    pub dimensions: Option<Dimensions>,
    pub lossless: bool,
}

const REALESRGAN_PRESETS: [Preset; 3] = [
    Preset::new(1, "realesr-animevideov3", PresetConstraint::scale(2, 4)),
    Preset::new(2, "realesrgan-plus-anime", PresetConstraint::scale(4, 4)),
    Preset::new(3, "realesrgan-plus", PresetConstraint::scale(4, 4)),
];

const LIBPLACEBO_PRESETS: [Preset; 7] = [
    Preset::new(1, "anime4k-v4-a", PresetConstraint::NONE),
    Preset::new(2, "anime4k-v4-a+a", PresetConstraint::NONE),
    Preset::new(3, "anime4k-v4-b+b", PresetConstraint::NONE),
    Preset::new(4, "anime4k-v4-c+a", PresetConstraint::NONE),
    Preset::new(5, "anime4k-v4-b", PresetConstraint::NONE),
    Preset::new(6, "anime4k-v4-c", PresetConstraint::NONE),
    Preset::new(7, "anime4k-v4.1-gan", PresetConstraint::NONE),
];

const REALCUGAN_PRESETS: [Preset; 3] = [
    Preset::new(1, "models-nose", PresetConstraint::scale(2, 2).with_max_noise(0)),
    Preset::new(2, "models-pro", PresetConstraint::scale(2, 3).with_max_noise(3)),
    Preset::new(3, "models-se", PresetConstraint::scale(2, 4).with_max_noise(3)),
];

const RIFE_PRESETS: [Preset; 14] = [
    Preset::new(1, "rife", PresetConstraint::NONE),
    Preset::new(2, "rife-HD", PresetConstraint::NONE),
    Preset::new(3, "rife-UHD", PresetConstraint::NONE),
    Preset::new(4, "rife-anime", PresetConstraint::NONE),
    Preset::new(5, "rife-v2", PresetConstraint::NONE),
    Preset::new(6, "rife-v2.3", PresetConstraint::NONE),
    Preset::new(7, "rife-v2.4", PresetConstraint::NONE),
    Preset::new(8, "rife-v3.0", PresetConstraint::NONE),
    Preset::new(9, "rife-v3.1", PresetConstraint::NONE),
    Preset::new(10, "rife-v4", PresetConstraint::NONE),
    Preset::new(11, "rife-v4.6", PresetConstraint::NONE),
    Preset::new(12, "rife-v4.25", PresetConstraint::NONE),
    Preset::new(13, "rife-v4.25-lite", PresetConstraint::NONE),
    Preset::new(14, "rife-v4.26", PresetConstraint::NONE),
];

// Shader pass down to 960x540 kept lossless, then a GAN pass at x4.
const LIB2REAL_CHAIN: [ChainStep; 2] = [
    ChainStep {
        processor: Processor::Libplacebo,
        preset: LIBPLACEBO_PRESETS[6],
        scale: None,
        dimensions: Some(Dimensions::new(960, 540)),
        lossless: true,
    },
    ChainStep {
        processor: Processor::RealEsrgan,
        preset: REALESRGAN_PRESETS[0],
        scale: Some(4),
        dimensions: None,
        lossless: false,
    },
];

/// All presets registered for a model (empty for composite chains)
pub fn presets(model: ModelSpec) -> &'static [Preset] {
    match model {
        ModelSpec::RealEsrgan => &REALESRGAN_PRESETS,
        ModelSpec::Libplacebo => &LIBPLACEBO_PRESETS,
        ModelSpec::RealCugan => &REALCUGAN_PRESETS,
        ModelSpec::Rife => &RIFE_PRESETS,
        ModelSpec::Lib2Real => &[],
    }
}

/// Look up a preset by its 1-based id
pub fn resolve(model: ModelSpec, preset_id: u32) -> Result<&'static Preset, CatalogError> {
    if model.is_chain() {
        return Err(CatalogError::NotSingleModel(model.name().to_string()));
    }
    presets(model)
        .iter()
        .find(|p| p.id == preset_id)
        .ok_or_else(|| CatalogError::UnknownPreset {
            model: model.name().to_string(),
            preset: preset_id,
        })
}

/// Ordered steps of a composite model
pub fn expand_chain(model: ModelSpec) -> Result<&'static [ChainStep], CatalogError> {
    match model {
        ModelSpec::Lib2Real => Ok(&LIB2REAL_CHAIN),
        other => Err(CatalogError::NotAChain(other.name().to_string())),
    }
}
