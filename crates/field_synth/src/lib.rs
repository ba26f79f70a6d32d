#![forbid(unsafe_code)]
//! field_synth: GPU slice-by-slice synthesis of volumetric fields.
//!
//! Modules:
//! - field: fields, their textures and dirty state, ordinals, per-field shader fragments
//! - generator: numeric modes, the programmatic generator, readback, resampling
//! - dataset: decoded datasets, segment splitting, the dataset-to-field factory
//! - gpu: the `GpuContext` seam and a headless CPU reference context
//! - uniforms: typed uniform values and their dispatch to GPU calls
//! - view: camera parameters for the renderer
//! - capabilities, color, diagnostics, error
//!
//! For examples, see the `field_synth_examples` crate.
pub mod capabilities;
pub mod color;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod field;
pub mod generator;
pub mod gpu;
pub mod uniforms;
pub mod view;

/// Convenient re-exports for common types. Import with `use field_synth::prelude::*;`.
pub mod prelude {
    pub use crate::capabilities::Capabilities;
    pub use crate::dataset::{
        fields_from_dataset, fields_from_dataset_with_diagnostics, split_segments, Dataset,
        FrameGroup, PixelMeasures, Segment, SopClass,
    };
    pub use crate::diagnostics::{
        Diagnostic, DiagnosticKind, DiagnosticSink, Severity, VecSink,
    };
    pub use crate::error::{Error, Result};
    pub use crate::field::{
        shared, unpack_bits, Field, FieldCore, Geometry, ImageField, Ordinal, OrdinalAllocator,
        SegmentationField, SharedField, TransformField,
    };
    pub use crate::generator::{
        slice_parameters, FragmentProgram, GenerateSummary, GeneratorConfig, NumericMode,
        ProgramLayout, ProgrammaticGenerator, ResampleProgram,
    };
    pub use crate::gpu::{GpuContext, HeadlessContext};
    pub use crate::uniforms::{set_uniforms, UniformMap, UniformValue};
    pub use crate::view::{Bounds, SliceOptions, SlicePlane, View};
}
