//! Fixed GPU capability configuration.
//!
//! Extension probing happens once, outside this crate, when the context is created. The
//! result is captured in [`Capabilities`] and handed to generators, fields and the ordinal
//! allocator at construction; nothing re-probes per call.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::generator::NumericMode;

/// Extension that makes 32-bit float textures color-renderable.
pub const COLOR_BUFFER_FLOAT: &str = "EXT_color_buffer_float";
/// Extension that allows linear filtering of 32-bit float textures.
pub const TEXTURE_FLOAT_LINEAR: &str = "OES_texture_float_linear";
/// Texture units guaranteed by WebGL 2 for combined fragment sampling.
pub const DEFAULT_MAX_TEXTURE_UNITS: u32 = 16;

/// What the GPU context can do, as far as field generation is concerned.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Render and sample through integer textures because float targets are unavailable.
    pub use_integer_textures: bool,
    /// Number of texture units; bounds the field ordinal namespace.
    pub max_texture_units: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            use_integer_textures: false,
            max_texture_units: DEFAULT_MAX_TEXTURE_UNITS,
        }
    }
}

impl Capabilities {
    pub fn new(use_integer_textures: bool, max_texture_units: u32) -> Self {
        Self {
            use_integer_textures,
            max_texture_units,
        }
    }

    /// Derives the numeric mode from the extension names the context reported.
    ///
    /// Float textures are used only when both float rendering and float linear filtering
    /// are available.
    pub fn from_extensions<I, S>(extensions: I, max_texture_units: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut color_buffer_float = false;
        let mut texture_float_linear = false;
        for ext in extensions {
            match ext.as_ref() {
                COLOR_BUFFER_FLOAT => color_buffer_float = true,
                TEXTURE_FLOAT_LINEAR => texture_float_linear = true,
                _ => {}
            }
        }
        Self {
            use_integer_textures: !(color_buffer_float && texture_float_linear),
            max_texture_units,
        }
    }

    /// Sets the texture unit count.
    pub fn with_max_texture_units(mut self, max_texture_units: u32) -> Self {
        self.max_texture_units = max_texture_units;
        self
    }

    pub fn numeric_mode(&self) -> NumericMode {
        if self.use_integer_textures {
            NumericMode::Integer
        } else {
            NumericMode::Float
        }
    }

    /// Whether float textures can be attached as render targets.
    pub fn float_color_buffers(&self) -> bool {
        !self.use_integer_textures
    }

    /// Validates the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_texture_units == 0 {
            return Err(Error::InvalidConfig("max_texture_units must be > 0".into()));
        }
        Ok(())
    }
}
