//! Error types and result alias for the crate.
//!
//! This module defines [`enum@crate::error::Error`] and the crate-wide [Result] alias. Most of
//! these never escape the generation pipeline: shader, uniform and dataset problems are turned
//! into [`crate::diagnostics::Diagnostic`]s at the point where work degrades to a no-op.
//! [`try_update_program`] returns build failures as `Compile` and `Link` instead.
//!
//! [`try_update_program`]: crate::generator::ProgrammaticGenerator::try_update_program
use thiserror::Error;

use crate::gpu::ShaderStage;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("all {capacity} texture units are claimed; field ordinals are never reclaimed")]
    OrdinalsExhausted { capacity: u32 },

    #[error("shader composition error: {0}")]
    Composition(String),

    /// `listing` is the numbered source the log's line numbers refer to.
    #[error("could not compile {stage} shader: {log}")]
    Compile {
        stage: ShaderStage,
        listing: String,
        log: String,
    },

    #[error("could not link program: {log}")]
    Link { listing: String, log: String },

    #[error("unsupported uniform kind '{kind}' for '{name}'")]
    UnsupportedUniform { name: String, kind: String },

    #[error("pixel data holds {actual} bytes but {expected} are required")]
    PixelDataLength { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Other(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_uses_other_variant() {
        let err: Error = String::from("boom").into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn compile_error_names_the_stage() {
        let err = Error::Compile {
            stage: ShaderStage::Fragment,
            listing: "   1: #version 300 es".into(),
            log: "ERROR: 0:3: syntax error".into(),
        };
        assert_eq!(
            err.to_string(),
            "could not compile fragment shader: ERROR: 0:3: syntax error"
        );
    }

    #[test]
    fn exhausted_ordinals_report_capacity() {
        let err = Error::OrdinalsExhausted { capacity: 16 };
        assert!(err.to_string().contains("16"));
    }
}
