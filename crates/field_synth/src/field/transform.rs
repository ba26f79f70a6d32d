//! Displacement volumes used to deform the sample points of other fields.
use glam::{Mat4, UVec3, Vec3};

use crate::dataset::Dataset;
use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::field::{Field, FieldCore, Geometry, Ordinal, SamplerType};
use crate::generator::NumericMode;
use crate::gpu::{Filter, GpuContext, PixelFormat, PixelType, TextureFormat};

/// A grid of patient-space displacement vectors stored as `RGB32F`.
///
/// Another field references it with [`FieldCore::set_transform`]; its `transformPoint`
/// then adds `transformGain * displacement` to each sample point.
#[derive(Clone, Debug)]
pub struct TransformField {
    core: FieldCore,
    displacements: Vec<Vec3>,
    filter: Filter,
}

impl TransformField {
    pub fn new(
        ordinal: Ordinal,
        mode: NumericMode,
        dimensions: UVec3,
        patient_to_pixel: Mat4,
        displacements: Vec<Vec3>,
    ) -> Result<Self> {
        let geometry = Geometry::new(dimensions, patient_to_pixel);
        if displacements.len() != geometry.voxel_count() {
            return Err(Error::PixelDataLength {
                expected: geometry.voxel_count(),
                actual: displacements.len(),
            });
        }
        Ok(Self::with_geometry(ordinal, mode, geometry, displacements))
    }

    pub fn from_dataset(ordinal: Ordinal, mode: NumericMode, dataset: &Dataset) -> Self {
        Self::from_dataset_with_diagnostics(ordinal, mode, dataset, &mut ())
    }

    /// Reads little-endian `f32` triples from the dataset's pixel payload. Missing vectors
    /// are zero and reported.
    pub fn from_dataset_with_diagnostics(
        ordinal: Ordinal,
        mode: NumericMode,
        dataset: &Dataset,
        sink: &mut dyn DiagnosticSink,
    ) -> Self {
        let dimensions = UVec3::new(dataset.columns, dataset.rows, dataset.number_of_frames);
        let geometry = Geometry::new(dimensions, dataset.patient_to_pixel());
        let mut displacements: Vec<Vec3> = dataset
            .pixel_data
            .chunks_exact(12)
            .map(|b| {
                let c = |i: usize| f32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
                Vec3::new(c(0), c(4), c(8))
            })
            .collect();
        if displacements.len() != geometry.voxel_count() {
            report(
                sink,
                Diagnostic::MalformedDataset {
                    context: format!("TransformField {}", ordinal),
                    message: format!(
                        "displacement grid holds {} vectors, {} expected",
                        displacements.len(),
                        geometry.voxel_count()
                    ),
                },
            );
            displacements.resize(geometry.voxel_count(), Vec3::ZERO);
        }
        Self::with_geometry(ordinal, mode, geometry, displacements)
    }

    fn with_geometry(
        ordinal: Ordinal,
        mode: NumericMode,
        geometry: Geometry,
        displacements: Vec<Vec3>,
    ) -> Self {
        // Float textures filter linearly only when the float path is available.
        let filter = match mode {
            NumericMode::Float => Filter::Linear,
            NumericMode::Integer => Filter::Nearest,
        };
        Self {
            core: FieldCore::new(ordinal, SamplerType::Float).with_geometry(geometry),
            displacements,
            filter,
        }
    }

    pub fn displacements(&self) -> &[Vec3] {
        &self.displacements
    }

    pub fn set_displacements(&mut self, displacements: Vec<Vec3>) -> Result<()> {
        let expected = self.core.geometry().map_or(0, Geometry::voxel_count);
        if displacements.len() != expected {
            return Err(Error::PixelDataLength {
                expected,
                actual: displacements.len(),
            });
        }
        self.displacements = displacements;
        self.core.modified();
        Ok(())
    }
}

impl Field for TransformField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn upload(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        let size = self.core.dimensions();
        let bytes: Vec<u8> = self
            .displacements
            .iter()
            .flat_map(|v| v.to_array())
            .flat_map(f32::to_ne_bytes)
            .collect();
        ctx.tex_storage_3d(TextureFormat::Rgb32F, size);
        ctx.tex_sub_image_3d(size, PixelFormat::Rgb, PixelType::Float, &bytes);
        ctx.tex_filter(self.filter);
        Ok(())
    }
}
