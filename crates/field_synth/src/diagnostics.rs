//! Diagnostics and sinks for observing degraded work.
//!
//! Nothing in the generation pipeline aborts: a shader that fails to build, a render target
//! that is incomplete, or a dataset that is malformed all degrade to a no-op for that unit of
//! work. This module defines the [`Diagnostic`] values emitted when that happens and the sinks
//! that collect or forward them. Every diagnostic is also logged through `tracing`.
use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::field::Ordinal;
use crate::gpu::{FramebufferStatus, ShaderStage};

/// Severity of a [`Diagnostic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Discriminant of a [`Diagnostic`], used by sinks to filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    ShaderCompileFailed,
    ProgramLinkFailed,
    CompositionFailed,
    MissingProgram,
    IncompleteFramebuffer,
    UnsupportedUniform,
    FallbackReadback,
    UploadFailed,
    MalformedDataset,
    UnrecognizedDataset,
}

/// Describes a recoverable problem encountered while building fields or generating them.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A shader stage did not compile. The generator is left without a program.
    ShaderCompileFailed {
        /// Stage that failed.
        stage: ShaderStage,
        /// Full source with line numbers, for matching against the log.
        listing: String,
        /// Driver info log.
        log: String,
    },

    /// The program did not link. The generator is left without a program.
    ProgramLinkFailed {
        /// Fragment source with line numbers.
        listing: String,
        /// Driver info log.
        log: String,
    },

    /// Per-field fragments could not be combined into one translation unit.
    CompositionFailed {
        /// Human-readable message.
        message: String,
    },

    /// `generate` was called on a generator whose program is absent.
    MissingProgram {
        /// Label of the generator.
        generator: String,
    },

    /// The off-screen target was incomplete for a slice; that slice writes nothing.
    IncompleteFramebuffer {
        /// Slice index being rendered.
        slice: u32,
        /// Status reported by the context.
        status: FramebufferStatus,
    },

    /// A uniform carried a kind that has no matching GPU call; it was skipped.
    UnsupportedUniform {
        /// Uniform symbol.
        name: String,
        /// The unrecognized kind tag.
        kind: String,
    },

    /// The context cannot read the compact native format for an attachment, so the
    /// four-component fallback is used.
    FallbackReadback {
        /// Color attachment index.
        attachment: usize,
    },

    /// A field could not upload its voxel data; it stays dirty.
    UploadFailed {
        /// Ordinal of the field.
        ordinal: Ordinal,
        /// Human-readable message.
        message: String,
    },

    /// A dataset violated an expectation; processing continued with best-effort data.
    MalformedDataset {
        /// Context string (e.g. the SOP class or segment).
        context: String,
        /// Human-readable message.
        message: String,
    },

    /// A dataset of an unknown class produced no fields.
    UnrecognizedDataset {
        /// The SOP class name or UID that was not recognized.
        sop_class: String,
    },
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::ShaderCompileFailed { .. } => DiagnosticKind::ShaderCompileFailed,
            Diagnostic::ProgramLinkFailed { .. } => DiagnosticKind::ProgramLinkFailed,
            Diagnostic::CompositionFailed { .. } => DiagnosticKind::CompositionFailed,
            Diagnostic::MissingProgram { .. } => DiagnosticKind::MissingProgram,
            Diagnostic::IncompleteFramebuffer { .. } => DiagnosticKind::IncompleteFramebuffer,
            Diagnostic::UnsupportedUniform { .. } => DiagnosticKind::UnsupportedUniform,
            Diagnostic::FallbackReadback { .. } => DiagnosticKind::FallbackReadback,
            Diagnostic::UploadFailed { .. } => DiagnosticKind::UploadFailed,
            Diagnostic::MalformedDataset { .. } => DiagnosticKind::MalformedDataset,
            Diagnostic::UnrecognizedDataset { .. } => DiagnosticKind::UnrecognizedDataset,
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind().severity()
    }
}

impl DiagnosticKind {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::FallbackReadback => Severity::Info,
            DiagnosticKind::MalformedDataset | DiagnosticKind::UnsupportedUniform => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

/// Receives the diagnostics reported by a `*_with_diagnostics` call.
pub trait DiagnosticSink {
    fn send(&mut self, diagnostic: Diagnostic);

    /// Whether diagnostics of `kind` are forwarded to this sink. They are logged either way.
    fn wants(&self, _kind: DiagnosticKind) -> bool {
        true
    }
}

/// Discards everything.
impl DiagnosticSink for () {
    #[inline]
    fn send(&mut self, _diagnostic: Diagnostic) {}

    #[inline]
    fn wants(&self, _kind: DiagnosticKind) -> bool {
        false
    }
}

/// Keeps reported diagnostics in order, with a running count per kind.
///
/// Built with [`VecSink::at_least`], it only keeps diagnostics at or above a severity, so
/// a caller interested in failures is not flooded with per-attachment fallback notices.
#[derive(Clone, Debug, Default)]
pub struct VecSink {
    diagnostics: Vec<Diagnostic>,
    counts: HashMap<DiagnosticKind, usize>,
    min_severity: Option<Severity>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that drops diagnostics below `severity`.
    pub fn at_least(severity: Severity) -> Self {
        Self {
            min_severity: Some(severity),
            ..Self::default()
        }
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Number of kept diagnostics of `kind`.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind() == kind)
    }

    /// Color attachments that switched to the four-component readback, in report order.
    /// Each attachment appears once per `generate` call.
    pub fn fallback_attachments(&self) -> Vec<usize> {
        self.diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::FallbackReadback { attachment } => Some(*attachment),
                _ => None,
            })
            .collect()
    }

    /// Slices whose render target was incomplete.
    pub fn incomplete_slices(&self) -> Vec<u32> {
        self.diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::IncompleteFramebuffer { slice, .. } => Some(*slice),
                _ => None,
            })
            .collect()
    }

    /// Highest severity kept so far.
    pub fn worst(&self) -> Option<Severity> {
        self.counts.keys().map(|k| k.severity()).max()
    }
}

impl DiagnosticSink for VecSink {
    fn send(&mut self, diagnostic: Diagnostic) {
        *self.counts.entry(diagnostic.kind()).or_insert(0) += 1;
        self.diagnostics.push(diagnostic);
    }

    fn wants(&self, kind: DiagnosticKind) -> bool {
        self.min_severity.is_none_or(|min| kind.severity() >= min)
    }
}

/// Logs `diagnostic` at its severity and forwards it to `sink` if the sink wants it.
pub(crate) fn report(sink: &mut dyn DiagnosticSink, diagnostic: Diagnostic) {
    match &diagnostic {
        Diagnostic::ShaderCompileFailed {
            stage,
            listing,
            log,
        } => {
            error!("Could not compile {} shader:\n{}\n{}", stage, listing, log);
        }
        Diagnostic::ProgramLinkFailed { listing, log } => {
            error!("Could not link program:\n{}\n{}", listing, log);
        }
        Diagnostic::CompositionFailed { message } => {
            error!("Could not compose shader fragments: {}", message);
        }
        Diagnostic::MissingProgram { generator } => {
            error!("Generator '{}' has no linked program; skipping.", generator);
        }
        Diagnostic::IncompleteFramebuffer { slice, status } => {
            error!("Incomplete framebuffer at slice {}: {}", slice, status);
        }
        Diagnostic::UnsupportedUniform { name, kind } => {
            warn!("Could not set uniform '{}' of kind '{}'.", name, kind);
        }
        Diagnostic::FallbackReadback { attachment } => {
            info!(
                "Framebuffer read not supported for attachment {}, using slower fallback method.",
                attachment
            );
        }
        Diagnostic::UploadFailed { ordinal, message } => {
            error!("Field {} could not upload its data: {}", ordinal, message);
        }
        Diagnostic::MalformedDataset { context, message } => {
            warn!("{}: {}", context, message);
        }
        Diagnostic::UnrecognizedDataset { sop_class } => {
            error!("Cannot process this dataset type '{}'.", sop_class);
        }
    }

    if sink.wants(diagnostic.kind()) {
        sink.send(diagnostic);
    }
}
