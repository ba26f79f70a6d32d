//! Scalar image volumes (CT, MR, PET, ...) and generated scalar outputs.
use glam::{Mat4, UVec3};

use crate::dataset::Dataset;
use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::field::{Field, FieldCore, FunctionFamily, Geometry, Ordinal, ShaderFragment};
use crate::generator::NumericMode;
use crate::gpu::{Filter, GpuContext, TextureFormat};
use crate::uniforms::UniformMap;

const DEFAULT_WINDOW_CENTER: f32 = 40.0;
const DEFAULT_WINDOW_WIDTH: f32 = 400.0;

/// A signed 16-bit scalar volume.
///
/// In integer mode the stored values are uploaded unchanged as `R16I` and sampled with
/// nearest filtering. In float mode the rescaled values are uploaded as `R32F` and sampled
/// linearly.
///
/// A field built with [`ImageField::generated`] is a generator output. If it keeps a
/// readback buffer, rendered slices are copied there in the generator's element type, and
/// a later upload re-uploads that copy instead of source pixels.
#[derive(Clone, Debug)]
pub struct ImageField {
    core: FieldCore,
    mode: NumericMode,
    pixel_data: Vec<i16>,
    rescale_slope: f32,
    rescale_intercept: f32,
    window_center: f32,
    window_width: f32,
    generated_pixel_data: Option<Vec<u8>>,
}

impl ImageField {
    /// An image field over `pixel_data`, laid out `x` fastest.
    pub fn new(
        ordinal: Ordinal,
        mode: NumericMode,
        dimensions: UVec3,
        patient_to_pixel: Mat4,
        pixel_data: Vec<i16>,
    ) -> Result<Self> {
        let geometry = Geometry::new(dimensions, patient_to_pixel);
        if pixel_data.len() != geometry.voxel_count() {
            return Err(Error::PixelDataLength {
                expected: geometry.voxel_count(),
                actual: pixel_data.len(),
            });
        }
        Ok(Self::with_core(ordinal, mode, geometry, pixel_data))
    }

    /// An output field for a generator. With `readback`, generated slices are copied into a
    /// CPU buffer of the mode's element type.
    pub fn generated(
        ordinal: Ordinal,
        mode: NumericMode,
        dimensions: UVec3,
        patient_to_pixel: Mat4,
        readback: bool,
    ) -> Self {
        let geometry = Geometry::new(dimensions, patient_to_pixel);
        let mut field = Self::with_core(ordinal, mode, geometry, Vec::new());
        if readback {
            let bytes = geometry.voxel_count() * mode.formats().bytes_per_element;
            field.generated_pixel_data = Some(vec![0; bytes]);
        }
        field
    }

    pub fn from_dataset(ordinal: Ordinal, mode: NumericMode, dataset: &Dataset) -> Self {
        Self::from_dataset_with_diagnostics(ordinal, mode, dataset, &mut ())
    }

    /// Builds the field from a 16-bit dataset. Short pixel data is zero-filled and reported.
    pub fn from_dataset_with_diagnostics(
        ordinal: Ordinal,
        mode: NumericMode,
        dataset: &Dataset,
        sink: &mut dyn DiagnosticSink,
    ) -> Self {
        let dimensions = UVec3::new(dataset.columns, dataset.rows, dataset.number_of_frames);
        let geometry = Geometry::new(dimensions, dataset.patient_to_pixel());
        let context = format!("ImageField {}", ordinal);

        if dataset.bits_allocated != 16 {
            report(
                sink,
                Diagnostic::MalformedDataset {
                    context: context.clone(),
                    message: format!(
                        "expected 16 bits allocated, got {}; reading as 16 bit",
                        dataset.bits_allocated
                    ),
                },
            );
        }
        let mut pixel_data: Vec<i16> = dataset
            .pixel_data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        if pixel_data.len() != geometry.voxel_count() {
            report(
                sink,
                Diagnostic::MalformedDataset {
                    context,
                    message: format!(
                        "pixel data holds {} voxels, {} expected",
                        pixel_data.len(),
                        geometry.voxel_count()
                    ),
                },
            );
            pixel_data.resize(geometry.voxel_count(), 0);
        }

        let mut field = Self::with_core(ordinal, mode, geometry, pixel_data);
        field.rescale_slope = dataset.rescale_slope;
        field.rescale_intercept = dataset.rescale_intercept;
        if let (Some(center), Some(width)) = (dataset.window_center, dataset.window_width) {
            field.window_center = center;
            field.window_width = width;
        }
        field
    }

    fn with_core(
        ordinal: Ordinal,
        mode: NumericMode,
        geometry: Geometry,
        pixel_data: Vec<i16>,
    ) -> Self {
        Self {
            core: FieldCore::new(ordinal, mode.sampler()).with_geometry(geometry),
            mode,
            pixel_data,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            window_center: DEFAULT_WINDOW_CENTER,
            window_width: DEFAULT_WINDOW_WIDTH,
            generated_pixel_data: None,
        }
    }

    pub fn numeric_mode(&self) -> NumericMode {
        self.mode
    }

    pub fn pixel_data(&self) -> &[i16] {
        &self.pixel_data
    }

    pub fn window(&self) -> (f32, f32) {
        (self.window_center, self.window_width)
    }

    pub fn set_window(&mut self, center: f32, width: f32) {
        self.window_center = center;
        self.window_width = width;
        self.core.modified();
    }

    pub fn set_rescale(&mut self, slope: f32, intercept: f32) {
        self.rescale_slope = slope;
        self.rescale_intercept = intercept;
        self.core.modified();
    }

    /// Raw readback bytes, in native byte order.
    pub fn generated_pixel_data(&self) -> Option<&[u8]> {
        self.generated_pixel_data.as_deref()
    }

    /// Readback values widened to `f32`.
    pub fn generated_values(&self) -> Option<Vec<f32>> {
        let bytes = self.generated_pixel_data.as_deref()?;
        let values = match self.mode {
            NumericMode::Integer => bytes
                .chunks_exact(2)
                .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f32)
                .collect(),
            NumericMode::Float => bytes
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };
        Some(values)
    }

    fn upload_bytes(&self) -> Option<Vec<u8>> {
        if let Some(generated) = &self.generated_pixel_data {
            return Some(generated.clone());
        }
        if self.pixel_data.is_empty() {
            return None;
        }
        let bytes = match self.mode {
            NumericMode::Integer => self
                .pixel_data
                .iter()
                .flat_map(|v| v.to_ne_bytes())
                .collect(),
            NumericMode::Float => self
                .pixel_data
                .iter()
                .map(|&v| v as f32 * self.rescale_slope + self.rescale_intercept)
                .flat_map(|v| v.to_ne_bytes())
                .collect(),
        };
        Some(bytes)
    }
}

impl Field for ImageField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn upload(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        let formats = self.mode.formats();
        let size = self.core.dimensions();
        ctx.tex_storage_3d(formats.texture_format, size);
        if let Some(bytes) = self.upload_bytes() {
            let (format, ty) = formats.read_format;
            ctx.tex_sub_image_3d(size, format, ty, &bytes);
        }
        let filter = match formats.texture_format {
            TextureFormat::R16I => Filter::Nearest,
            _ => Filter::Linear,
        };
        ctx.tex_filter(filter);
        Ok(())
    }

    fn uniforms(&self) -> UniformMap {
        let n = self.core.ordinal();
        let mut u = self.core.uniforms();
        u.insert(n.suffix("windowCenter"), self.window_center)
            .insert(n.suffix("windowWidth"), self.window_width);
        u
    }

    fn shader_fragment(&self) -> ShaderFragment {
        let n = self.core.ordinal();
        let transfer = FunctionFamily::Transfer.symbol(n);
        let mut fragment = self
            .core
            .base_fragment()
            .uniform("float", "windowCenter")
            .uniform("float", "windowWidth");
        fragment.set_function(
            FunctionFamily::Transfer,
            format!(
                r#"
void {transfer}(const in float sampleValue,
                const in float gradientMagnitude,
                out vec3 color,
                out float opacity)
{{
  float windowMin = windowCenter{n} - 0.5 * windowWidth{n};
  float intensity = clamp((sampleValue - windowMin) / windowWidth{n}, 0., 1.);
  color = intensity * rgba{n}.rgb;
  opacity = intensity * rgba{n}.a * gradientMagnitude * gradientOpacityScale{n};
}}"#
            ),
        );
        fragment.set_function(FunctionFamily::Sample, self.core.gradient_sample_source());
        fragment
    }

    fn readback_buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.generated_pixel_data.as_deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::dataset::SopClass;
    use crate::diagnostics::{DiagnosticKind, VecSink};
    use crate::gpu::HeadlessContext;
    use crate::uniforms::UniformValue;

    fn ct(values: &[i16]) -> Dataset {
        let mut ds = Dataset::new(SopClass::CtImage, values.len() as u32, 1, 1);
        ds.pixel_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        ds.rescale_slope = 2.0;
        ds.rescale_intercept = -1000.0;
        ds
    }

    #[test]
    fn integer_mode_uploads_stored_values() {
        let mut ctx = HeadlessContext::new(&Capabilities::new(true, 16));
        let mut field = ImageField::from_dataset(Ordinal(0), NumericMode::Integer, &ct(&[-5, 7]));
        field.field_to_texture(&mut ctx);
        let texture = field.core().texture().unwrap();
        assert_eq!(ctx.texture_format(texture), Some(TextureFormat::R16I));
        let texels = ctx.texture_texels(texture).unwrap();
        assert_eq!((texels[0][0], texels[1][0]), (-5.0, 7.0));
    }

    #[test]
    fn float_mode_uploads_rescaled_values() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut field = ImageField::from_dataset(Ordinal(0), NumericMode::Float, &ct(&[0, 500]));
        field.field_to_texture(&mut ctx);
        let texture = field.core().texture().unwrap();
        let texels = ctx.texture_texels(texture).unwrap();
        assert_eq!((texels[0][0], texels[1][0]), (-1000.0, 0.0));
    }

    #[test]
    fn short_pixel_data_is_reported_and_padded() {
        let mut ds = ct(&[1, 2]);
        ds.columns = 3;
        let mut sink = VecSink::new();
        let field = ImageField::from_dataset_with_diagnostics(
            Ordinal(0),
            NumericMode::Integer,
            &ds,
            &mut sink,
        );
        assert_eq!(field.pixel_data(), &[1, 2, 0]);
        assert_eq!(sink.count(DiagnosticKind::MalformedDataset), 1);
    }

    #[test]
    fn new_checks_the_voxel_count() {
        let err = ImageField::new(
            Ordinal(0),
            NumericMode::Float,
            UVec3::new(2, 2, 2),
            Mat4::IDENTITY,
            vec![0; 7],
        )
        .unwrap_err();
        assert!(matches!(err, Error::PixelDataLength { expected: 8, actual: 7 }));
    }

    #[test]
    fn generated_output_reuploads_its_readback_copy() {
        let mut ctx = HeadlessContext::new(&Capabilities::new(true, 16));
        let mut field = ImageField::generated(
            Ordinal(1),
            NumericMode::Integer,
            UVec3::new(2, 1, 1),
            Mat4::IDENTITY,
            true,
        );
        field
            .readback_buffer_mut()
            .unwrap()
            .copy_from_slice(&[3i16.to_ne_bytes(), 9i16.to_ne_bytes()].concat());
        field.field_to_texture(&mut ctx);
        let texels = ctx.texture_texels(field.core().texture().unwrap()).unwrap();
        assert_eq!((texels[0][0], texels[1][0]), (3.0, 9.0));
        assert_eq!(field.generated_values(), Some(vec![3.0, 9.0]));
    }

    #[test]
    fn window_uniforms_are_published() {
        let mut field = ImageField::generated(
            Ordinal(6),
            NumericMode::Float,
            UVec3::ONE,
            Mat4::IDENTITY,
            false,
        );
        field.set_window(100.0, 50.0);
        let u = field.uniforms();
        assert_eq!(u.get("windowCenter6"), Some(&UniformValue::Float(100.0)));
        assert_eq!(u.get("windowWidth6"), Some(&UniformValue::Float(50.0)));
        assert!(u.contains("patientToPixel6"));
        assert!(field.shader_fragment().uniforms().iter().any(|d| d.name == "windowWidth6"));
    }
}
