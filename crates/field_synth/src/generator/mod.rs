//! Generators populate output fields from input fields on the GPU.
//!
//! Modules:
//! - programmatic: the slice-by-slice [`ProgrammaticGenerator`] and the [`FragmentProgram`] seam
//! - readback: native and four-component readback of rendered slices
//! - resample: [`ResampleProgram`], a ready-made program sampling inputs at output voxels
use std::fmt::Write as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};
use crate::field::SamplerType;
use crate::gpu::{PixelFormat, PixelType, TextureFormat};
use crate::uniforms::{UniformMap, UniformValue};

pub mod programmatic;
pub mod readback;
pub mod resample;

pub use programmatic::{
    slice_parameter, slice_parameters, FragmentProgram, GenerateSummary, ProgramLayout,
    ProgrammaticGenerator,
};
pub use readback::SliceReadback;
pub use resample::ResampleProgram;

/// Numeric path used for textures, samplers and readback.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericMode {
    /// Integer textures, for contexts that cannot render to or filter float textures.
    Integer,
    Float,
}

impl NumericMode {
    pub fn formats(self) -> GeneratorFormats {
        match self {
            NumericMode::Integer => GeneratorFormats {
                sampler: SamplerType::Integer,
                buffer_type: "int",
                texture_format: TextureFormat::R16I,
                read_format: (PixelFormat::RedInteger, PixelType::Short),
                fallback_format: (PixelFormat::RgbaInteger, PixelType::Int),
                bytes_per_element: 2,
            },
            NumericMode::Float => GeneratorFormats {
                sampler: SamplerType::Float,
                buffer_type: "float",
                texture_format: TextureFormat::R32F,
                read_format: (PixelFormat::Red, PixelType::Float),
                fallback_format: (PixelFormat::Rgba, PixelType::Float),
                bytes_per_element: 4,
            },
        }
    }

    pub fn sampler(self) -> SamplerType {
        self.formats().sampler
    }
}

/// Everything that differs between the integer and float paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeneratorFormats {
    pub sampler: SamplerType,
    /// GLSL scalar type written to each output.
    pub buffer_type: &'static str,
    /// Storage format of generated textures.
    pub texture_format: TextureFormat,
    /// Compact single-component readback.
    pub read_format: (PixelFormat, PixelType),
    /// Four-component readback used when the compact pair is not supported.
    pub fallback_format: (PixelFormat, PixelType),
    /// Size of one element in a CPU readback buffer.
    pub bytes_per_element: usize,
}

impl GeneratorFormats {
    pub fn fallback_components(&self) -> usize {
        self.fallback_format.0.components()
    }

    pub fn fallback_bytes_per_pixel(&self) -> usize {
        self.fallback_components() * self.fallback_format.1.bytes()
    }
}

/// Configuration of a generator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorConfig {
    /// Name used in logs and recorded on output fields.
    pub label: String,
    pub numeric_mode: NumericMode,
    /// Generator-wide uniforms, uploaded before the per-field ones.
    pub uniforms: UniformMap,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            label: "generator".into(),
            numeric_mode: NumericMode::Float,
            uniforms: UniformMap::new(),
        }
    }
}

impl GeneratorConfig {
    pub fn new(numeric_mode: NumericMode) -> Self {
        Self {
            numeric_mode,
            ..Self::default()
        }
    }

    /// A configuration in the numeric mode the context supports. Fails on capabilities
    /// that cannot host any field.
    pub fn from_capabilities(capabilities: &Capabilities) -> Result<Self> {
        capabilities.validate()?;
        Ok(Self::new(capabilities.numeric_mode()))
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Adds a generator-wide uniform.
    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.insert(name, value);
        self
    }

    /// Adds every uniform in `uniforms`.
    pub fn with_uniforms(mut self, uniforms: &UniformMap) -> Self {
        self.uniforms.extend_from(uniforms);
        self
    }

    pub fn formats(&self) -> GeneratorFormats {
        self.numeric_mode.formats()
    }

    /// Validates the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(Error::InvalidConfig("label must not be empty".into()));
        }
        if self.uniforms.contains("slice") {
            return Err(Error::InvalidConfig(
                "'slice' is set per slice by the generator".into(),
            ));
        }
        Ok(())
    }
}

/// `source` with 1-based line numbers, matching compiler log positions.
pub fn number_lines(source: &str) -> String {
    let mut listing = String::with_capacity(source.len() + source.len() / 8);
    for (n, line) in source.lines().enumerate() {
        let _ = writeln!(listing, "{:4}: {}", n + 1, line);
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_mode_reads_shorts() {
        let f = NumericMode::Integer.formats();
        assert_eq!(f.read_format, (PixelFormat::RedInteger, PixelType::Short));
        assert_eq!(f.fallback_format, (PixelFormat::RgbaInteger, PixelType::Int));
        assert_eq!(f.bytes_per_element, 2);
        assert_eq!(f.fallback_bytes_per_pixel(), 16);
        assert_eq!(f.sampler.glsl(), "isampler3D");
    }

    #[test]
    fn float_mode_reads_floats() {
        let f = NumericMode::Float.formats();
        assert_eq!(f.read_format, (PixelFormat::Red, PixelType::Float));
        assert_eq!(f.fallback_format, (PixelFormat::Rgba, PixelType::Float));
        assert_eq!(f.buffer_type, "float");
        assert_eq!(f.bytes_per_element, 4);
    }

    #[test]
    fn config_builder_and_validation() {
        let caps = Capabilities::new(true, 16);
        let cfg = GeneratorConfig::from_capabilities(&caps)
            .unwrap()
            .with_label("resample")
            .with_uniform("gradientSize", 1.0f32);
        assert_eq!(cfg.numeric_mode, NumericMode::Integer);
        assert!(cfg.validate().is_ok());

        let bad = cfg.clone().with_label("  ");
        assert!(matches!(bad.validate(), Err(Error::InvalidConfig(_))));

        let reserved = cfg.with_uniform("slice", 0.5f32);
        assert!(reserved.validate().is_err());
    }

    #[test]
    fn capabilities_without_texture_units_are_rejected() {
        let caps = Capabilities::new(false, 0);
        let result = GeneratorConfig::from_capabilities(&caps);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn listing_numbers_from_one() {
        let listing = number_lines("a\nb");
        assert_eq!(listing, "   1: a\n   2: b\n");
    }
}
