//! Binary segmentation volumes.
use glam::{UVec3, Vec4};

use crate::color::dicom_lab_to_rgb;
use crate::dataset::{Dataset, Segment};
use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::Result;
use crate::field::{
    Field, FieldCore, FunctionFamily, Geometry, Ordinal, SamplerType, ShaderFragment,
};
use crate::gpu::{Filter, GpuContext, PixelFormat, PixelType, TextureFormat};

/// Unpacks 1-bit voxels into a byte volume of 0 and 255.
///
/// Each of the `slices * rows` packed rows holds `ceil(columns / 8)` bytes; column `c` is
/// bit `c % 8` of byte `c / 8`, least significant bit first. Bytes missing from `packed`
/// read as zero.
pub fn unpack_bits(packed: &[u8], columns: u32, rows: u32, slices: u32) -> Vec<u8> {
    let (columns, rows, slices) = (columns as usize, rows as usize, slices as usize);
    let bytes_per_row = columns.div_ceil(8);
    let mut voxels = vec![0u8; slices * rows * columns];
    for (packed_row, out_row) in voxels.chunks_exact_mut(columns.max(1)).enumerate() {
        let start = packed_row * bytes_per_row;
        for (column, voxel) in out_row.iter_mut().enumerate() {
            let byte = packed.get(start + column / 8).copied().unwrap_or(0);
            let bit = (byte >> (column % 8)) & 1;
            *voxel = 255 * bit;
        }
    }
    voxels
}

/// One segment of a segmentation dataset as an 8-bit volume.
#[derive(Clone, Debug)]
pub struct SegmentationField {
    core: FieldCore,
    dataset: Dataset,
}

impl SegmentationField {
    pub fn new(ordinal: Ordinal, dataset: Dataset) -> Self {
        Self::new_with_diagnostics(ordinal, dataset, &mut ())
    }

    /// Builds the field from a single-segment dataset, reporting inconsistencies as
    /// warnings.
    pub fn new_with_diagnostics(
        ordinal: Ordinal,
        dataset: Dataset,
        sink: &mut dyn DiagnosticSink,
    ) -> Self {
        if dataset.bits_allocated != 1 {
            warn(
                sink,
                ordinal,
                format!("can only render 1 bit data, got {} bits", dataset.bits_allocated),
            );
        }
        if let Some(measures) = dataset.pixel_measures {
            if measures.spacing_between_slices != measures.slice_thickness {
                warn(
                    sink,
                    ordinal,
                    format!(
                        "SpacingBetweenSlices and SliceThickness should be equal ({} != {})",
                        measures.spacing_between_slices, measures.slice_thickness
                    ),
                );
            }
        }
        if dataset.segments.len() != 1 {
            warn(
                sink,
                ordinal,
                format!("expected exactly one segment, found {}", dataset.segments.len()),
            );
        }
        let expected = packed_len(&dataset);
        if dataset.pixel_data.len() < expected {
            warn(
                sink,
                ordinal,
                format!(
                    "pixel data holds {} bytes, {} expected; missing voxels are empty",
                    dataset.pixel_data.len(),
                    expected
                ),
            );
        }

        let geometry = Geometry::new(
            UVec3::new(dataset.columns, dataset.rows, dataset.number_of_frames),
            dataset.patient_to_pixel(),
        );
        let mut core = FieldCore::new(ordinal, SamplerType::Float).with_geometry(geometry);
        if let Some(segment) = dataset.segments.first() {
            let rgb = dicom_lab_to_rgb(segment.recommended_display_cielab);
            core.set_rgba(Vec4::new(rgb.x, rgb.y, rgb.z, 1.0));
        }
        core.set_gradient_opacity_scale(1.0);

        Self { core, dataset }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.dataset.segments.first()
    }

    /// The volume as 0/255 bytes, `x` fastest.
    pub fn unpack(&self) -> Vec<u8> {
        unpack_bits(
            &self.dataset.pixel_data,
            self.dataset.columns,
            self.dataset.rows,
            self.dataset.number_of_frames,
        )
    }
}

fn warn(sink: &mut dyn DiagnosticSink, ordinal: Ordinal, message: String) {
    report(
        sink,
        Diagnostic::MalformedDataset {
            context: format!("SegmentationField {}", ordinal),
            message,
        },
    );
}

fn packed_len(dataset: &Dataset) -> usize {
    (dataset.columns as usize).div_ceil(8)
        * dataset.rows as usize
        * dataset.number_of_frames as usize
}

impl Field for SegmentationField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn upload(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        let size = self.core.dimensions();
        let voxels = self.unpack();
        ctx.tex_storage_3d(TextureFormat::R8, size);
        ctx.tex_sub_image_3d(size, PixelFormat::Red, PixelType::UnsignedByte, &voxels);
        ctx.tex_filter(Filter::Linear);
        Ok(())
    }

    fn shader_fragment(&self) -> ShaderFragment {
        let n = self.core.ordinal();
        let transfer = FunctionFamily::Transfer.symbol(n);
        let mut fragment = self.core.base_fragment();
        fragment.set_function(
            FunctionFamily::Transfer,
            format!(
                r#"
void {transfer}(const in float sampleValue,
                const in float gradientMagnitude,
                out vec3 color,
                out float opacity)
{{
  color = vec3(0., 0., 0.);
  opacity = 0.;
  if (sampleValue > 0.) {{
    color = sampleValue * rgba{n}.rgb;
    opacity = rgba{n}.a * gradientMagnitude * gradientOpacityScale{n};
  }}
}}"#
            ),
        );
        fragment.set_function(FunctionFamily::Sample, self.core.gradient_sample_source());
        fragment
    }
}
