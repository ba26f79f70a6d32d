//! Fields: volumetric data with a GPU texture, dirty tracking and shader contributions.
//!
//! Shared state lives in [`FieldCore`]; variants implement [`Field`] and supply only the
//! upload and the parts of the shader fragment that differ. Fields are shared between
//! generators and callers as [`SharedField`].
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use glam::{Mat4, UVec3, Vec4};

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::Result;
use crate::gpu::{GpuContext, TextureId};
use crate::uniforms::UniformMap;

pub mod image;
pub mod ordinal;
pub mod segmentation;
pub mod shader;
pub mod transform;

pub use image::ImageField;
pub use ordinal::{Ordinal, OrdinalAllocator};
pub use segmentation::{unpack_bits, SegmentationField};
pub use shader::{FunctionFamily, ShaderComposer, ShaderFragment, UniformDecl};
pub use transform::TransformField;

/// A field shared between its owner and the generators that read or write it.
pub type SharedField = Rc<RefCell<dyn Field>>;

/// Wraps a field for sharing.
pub fn shared<F: Field + 'static>(field: F) -> SharedField {
    Rc::new(RefCell::new(field))
}

pub const DEFAULT_RGBA: Vec4 = Vec4::ONE;
pub const DEFAULT_GRADIENT_OPACITY_SCALE: f32 = 0.0005;
pub const DEFAULT_TRANSFORM_GAIN: f32 = 1.0;

/// GLSL sampler a field's texture is read through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerType {
    Float,
    Integer,
}

impl SamplerType {
    pub fn glsl(self) -> &'static str {
        match self {
            SamplerType::Float => "sampler3D",
            SamplerType::Integer => "isampler3D",
        }
    }
}

/// Voxel grid of a spatial field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// Columns, rows, slices.
    pub dimensions: UVec3,
    /// Maps patient-space points to continuous voxel indices.
    pub patient_to_pixel: Mat4,
}

impl Geometry {
    pub fn new(dimensions: UVec3, patient_to_pixel: Mat4) -> Self {
        Self {
            dimensions,
            patient_to_pixel,
        }
    }

    pub fn pixels_per_slice(&self) -> usize {
        self.dimensions.x as usize * self.dimensions.y as usize
    }

    pub fn voxel_count(&self) -> usize {
        self.pixels_per_slice() * self.dimensions.z as usize
    }

    pub fn pixel_to_patient(&self) -> Mat4 {
        self.patient_to_pixel.inverse()
    }
}

/// State shared by every field variant.
#[derive(Clone, Debug)]
pub struct FieldCore {
    ordinal: Ordinal,
    texture: Option<TextureId>,
    modified_time: u64,
    updated_time: u64,
    visible: bool,
    rgba: Vec4,
    gradient_opacity_scale: f32,
    transform: Option<Ordinal>,
    transform_gain: f32,
    sampler: SamplerType,
    geometry: Option<Geometry>,
    generator: Option<String>,
}

impl FieldCore {
    /// A dirty field with default visual attributes.
    pub fn new(ordinal: Ordinal, sampler: SamplerType) -> Self {
        Self {
            ordinal,
            texture: None,
            modified_time: 1,
            updated_time: 0,
            visible: true,
            rgba: DEFAULT_RGBA,
            gradient_opacity_scale: DEFAULT_GRADIENT_OPACITY_SCALE,
            transform: None,
            transform_gain: DEFAULT_TRANSFORM_GAIN,
            sampler,
            geometry: None,
            generator: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn sampler(&self) -> SamplerType {
        self.sampler
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Voxel dimensions, zero for non-spatial fields.
    pub fn dimensions(&self) -> UVec3 {
        self.geometry.map_or(UVec3::ZERO, |g| g.dimensions)
    }

    pub fn modified_time(&self) -> u64 {
        self.modified_time
    }

    pub fn updated_time(&self) -> u64 {
        self.updated_time
    }

    /// Marks the GPU copy stale.
    pub fn modified(&mut self) {
        self.modified_time += 1;
    }

    /// Marks the GPU copy current.
    pub fn updated(&mut self) {
        self.updated_time = self.modified_time;
    }

    pub fn needs_update(&self) -> bool {
        self.updated_time < self.modified_time
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.modified();
    }

    pub fn rgba(&self) -> Vec4 {
        self.rgba
    }

    pub fn set_rgba(&mut self, rgba: Vec4) {
        self.rgba = rgba;
        self.modified();
    }

    pub fn gradient_opacity_scale(&self) -> f32 {
        self.gradient_opacity_scale
    }

    pub fn set_gradient_opacity_scale(&mut self, scale: f32) {
        self.gradient_opacity_scale = scale;
        self.modified();
    }

    pub fn transform(&self) -> Option<Ordinal> {
        self.transform
    }

    /// Displaces this field's sample points by the field with ordinal `transform`.
    ///
    /// The transform field must be among the inputs of any generator reading this field.
    pub fn set_transform(&mut self, transform: Option<Ordinal>) {
        self.transform = transform;
        self.modified();
    }

    pub fn transform_gain(&self) -> f32 {
        self.transform_gain
    }

    pub fn set_transform_gain(&mut self, gain: f32) {
        self.transform_gain = gain;
        self.modified();
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
        self.modified();
    }

    /// Label of the generator that populates this field.
    pub fn generator(&self) -> Option<&str> {
        self.generator.as_deref()
    }

    pub fn set_generator(&mut self, label: impl Into<String>) {
        self.generator = Some(label.into());
    }

    /// Replaces the texture with a fresh one bound to this field's unit.
    pub fn allocate_texture(&mut self, ctx: &mut dyn GpuContext) -> TextureId {
        if let Some(old) = self.texture.take() {
            ctx.delete_texture(old);
        }
        let texture = ctx.create_texture();
        ctx.active_texture(self.ordinal.texture_unit());
        ctx.bind_texture_3d(Some(texture));
        self.texture = Some(texture);
        texture
    }

    /// Deletes the texture. The field becomes dirty again.
    pub fn release(&mut self, ctx: &mut dyn GpuContext) {
        if let Some(texture) = self.texture.take() {
            ctx.delete_texture(texture);
            self.modified();
        }
    }

    /// Current uniform values, named with this field's ordinal.
    pub fn uniforms(&self) -> UniformMap {
        let n = self.ordinal;
        let mut u = UniformMap::new();
        u.insert(n.suffix("visible"), self.visible as i32)
            .insert(n.suffix("rgba"), self.rgba)
            .insert(n.suffix("gradientOpacityScale"), self.gradient_opacity_scale)
            .insert(n.suffix("textureUnit"), n.texture_unit() as i32);
        if self.transform.is_some() {
            u.insert(n.suffix("transformGain"), self.transform_gain);
        }
        if let Some(geometry) = &self.geometry {
            u.insert(n.suffix("patientToPixel"), geometry.patient_to_pixel)
                .insert(n.suffix("pixelDimensions"), geometry.dimensions.as_ivec3());
        }
        u
    }

    /// Uniform declarations and default functions for this field.
    pub fn base_fragment(&self) -> ShaderFragment {
        let n = self.ordinal;
        let mut fragment = ShaderFragment::new(n)
            .uniform("int", "visible")
            .uniform("vec4", "rgba")
            .uniform("float", "gradientOpacityScale")
            .uniform(self.sampler.glsl(), "textureUnit");

        let patient_to_texture = FunctionFamily::PatientToTexture.symbol(n);
        if self.geometry.is_some() {
            fragment.declare_uniform("mat4", "patientToPixel");
            fragment.declare_uniform("ivec3", "pixelDimensions");
            fragment.set_function(
                FunctionFamily::PatientToTexture,
                format!(
                    r#"
vec3 {patient_to_texture}(const in vec3 patientPoint)
{{
  vec3 pixel = (patientToPixel{n} * vec4(patientPoint, 1.)).xyz;
  return (pixel + vec3(0.5)) / vec3(pixelDimensions{n});
}}"#
                ),
            );
        } else {
            fragment.set_function(
                FunctionFamily::PatientToTexture,
                format!(
                    r#"
vec3 {patient_to_texture}(const in vec3 patientPoint)
{{
  return patientPoint;
}}"#
                ),
            );
        }

        let transform_point = FunctionFamily::Transform.symbol(n);
        match self.transform {
            Some(t) => {
                let displacement_to_texture = FunctionFamily::PatientToTexture.symbol(t);
                let displacement_unit = t.suffix("textureUnit");
                fragment.declare_uniform("float", "transformGain");
                fragment = fragment
                    .requires(displacement_to_texture.clone())
                    .requires(displacement_unit.clone());
                fragment.set_function(
                    FunctionFamily::Transform,
                    format!(
                        r#"
vec3 {transform_point}(const in vec3 samplePoint)
{{
  vec3 transformSTPPoint = {displacement_to_texture}(samplePoint);
  vec3 displacement = vec3(texture({displacement_unit}, transformSTPPoint).xyz);
  return samplePoint + transformGain{n} * displacement;
}}"#
                    ),
                );
            }
            None => {
                fragment.set_function(
                    FunctionFamily::Transform,
                    format!(
                        r#"
vec3 {transform_point}(const in vec3 samplePoint)
{{
  return samplePoint;
}}"#
                    ),
                );
            }
        }

        let transfer = FunctionFamily::Transfer.symbol(n);
        fragment.set_function(
            FunctionFamily::Transfer,
            format!(
                r#"
void {transfer}(const in float sampleValue,
                const in float gradientMagnitude,
                out vec3 color,
                out float opacity)
{{
}}"#
            ),
        );

        let sample = FunctionFamily::Sample.symbol(n);
        let sampler = self.sampler.glsl();
        fragment.set_function(
            FunctionFamily::Sample,
            format!(
                r#"
void {sample}(const in {sampler} textureUnit,
              const in vec3 samplePointPatient,
              const in float gradientSize,
              out float sampleValue,
              out vec3 normal,
              out float gradientMagnitude)
{{
}}"#
            ),
        );
        fragment
    }

    /// Central-difference sampling through the transform, shared by voxel fields.
    pub(crate) fn gradient_sample_source(&self) -> String {
        let n = self.ordinal;
        let sample = FunctionFamily::Sample.symbol(n);
        let transform_point = FunctionFamily::Transform.symbol(n);
        let patient_to_texture = FunctionFamily::PatientToTexture.symbol(n);
        let sampler = self.sampler.glsl();
        format!(
            r#"
void {sample}(const in {sampler} textureUnit,
              const in vec3 samplePointPatient,
              const in float gradientSize,
              out float sampleValue,
              out vec3 normal,
              out float gradientMagnitude)
{{
  vec3 stp = {patient_to_texture}({transform_point}(samplePointPatient));
  sampleValue = float(texture(textureUnit, stp).r);
  vec3 delta = vec3(gradientSize) / vec3(pixelDimensions{n});
  normal.x = float(texture(textureUnit, stp + vec3(delta.x, 0., 0.)).r)
           - float(texture(textureUnit, stp - vec3(delta.x, 0., 0.)).r);
  normal.y = float(texture(textureUnit, stp + vec3(0., delta.y, 0.)).r)
           - float(texture(textureUnit, stp - vec3(0., delta.y, 0.)).r);
  normal.z = float(texture(textureUnit, stp + vec3(0., 0., delta.z)).r)
           - float(texture(textureUnit, stp - vec3(0., 0., delta.z)).r);
  gradientMagnitude = length(normal);
  if (gradientMagnitude > 0.) {{
    normal = normal / gradientMagnitude;
  }}
}}"#
        )
    }
}

/// Shared contract of every field variant.
pub trait Field: fmt::Debug {
    fn core(&self) -> &FieldCore;

    fn core_mut(&mut self) -> &mut FieldCore;

    /// Allocates storage for and uploads the field's data into the texture bound to its
    /// unit. Called only from [`Field::field_to_texture`].
    fn upload(&mut self, ctx: &mut dyn GpuContext) -> Result<()>;

    fn shader_fragment(&self) -> ShaderFragment {
        self.core().base_fragment()
    }

    fn uniforms(&self) -> UniformMap {
        self.core().uniforms()
    }

    /// CPU buffer that receives generated slices, if the field keeps one.
    fn readback_buffer_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn ordinal(&self) -> Ordinal {
        self.core().ordinal()
    }

    fn modified(&mut self) {
        self.core_mut().modified();
    }

    fn needs_update(&self) -> bool {
        self.core().needs_update()
    }

    /// Brings the texture up to date. Returns `true` if GPU work was done.
    fn field_to_texture(&mut self, ctx: &mut dyn GpuContext) -> bool {
        self.field_to_texture_with_diagnostics(ctx, &mut ())
    }

    fn field_to_texture_with_diagnostics(
        &mut self,
        ctx: &mut dyn GpuContext,
        sink: &mut dyn DiagnosticSink,
    ) -> bool {
        if !self.needs_update() {
            return false;
        }
        self.core_mut().allocate_texture(ctx);
        match self.upload(ctx) {
            Ok(()) => {
                self.core_mut().updated();
                true
            }
            Err(err) => {
                report(
                    sink,
                    Diagnostic::UploadFailed {
                        ordinal: self.ordinal(),
                        message: err.to_string(),
                    },
                );
                false
            }
        }
    }

    /// Deletes the field's texture.
    fn release(&mut self, ctx: &mut dyn GpuContext) {
        self.core_mut().release(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::error::Error;
    use crate::gpu::{HeadlessContext, TextureFormat};
    use crate::uniforms::UniformValue;

    #[derive(Debug)]
    struct Scalar {
        core: FieldCore,
        fail: bool,
    }

    impl Field for Scalar {
        fn core(&self) -> &FieldCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut FieldCore {
            &mut self.core
        }

        fn upload(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
            if self.fail {
                return Err(Error::Other("no data".into()));
            }
            ctx.tex_storage_3d(TextureFormat::R8, UVec3::ONE);
            Ok(())
        }
    }

    fn scalar(n: u32) -> Scalar {
        Scalar {
            core: FieldCore::new(Ordinal(n), SamplerType::Float),
            fail: false,
        }
    }

    #[test]
    fn dirty_until_uploaded() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut field = scalar(0);
        assert!(field.needs_update());
        assert!(field.field_to_texture(&mut ctx));
        assert!(!field.needs_update());
        assert!(!field.field_to_texture(&mut ctx));

        field.core_mut().set_rgba(Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(field.needs_update());
    }

    #[test]
    fn regeneration_replaces_the_texture() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut field = scalar(3);
        field.field_to_texture(&mut ctx);
        let first = field.core().texture().unwrap();
        field.modified();
        field.field_to_texture(&mut ctx);
        let second = field.core().texture().unwrap();
        assert_ne!(first, second);
        assert_eq!(ctx.live_texture_count(), 1);
        assert_eq!(ctx.bound_texture(3), Some(second));
    }

    #[test]
    fn failed_upload_stays_dirty() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut field = scalar(0);
        field.fail = true;
        let mut sink = crate::diagnostics::VecSink::new();
        assert!(!field.field_to_texture_with_diagnostics(&mut ctx, &mut sink));
        assert!(field.needs_update());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn uniforms_are_suffixed_by_ordinal() {
        let mut field = scalar(4);
        let u = field.uniforms();
        assert_eq!(u.get("visible4"), Some(&UniformValue::Int(1)));
        assert_eq!(u.get("textureUnit4"), Some(&UniformValue::Int(4)));
        assert!(u.contains("rgba4"));
        assert!(!u.contains("transformGain4"));

        field.core_mut().set_transform(Some(Ordinal(1)));
        assert_eq!(field.uniforms().get("transformGain4"), Some(&UniformValue::Float(1.0)));
    }

    #[test]
    fn transform_fragment_requires_the_transform_field() {
        let mut field = scalar(2);
        field.core_mut().set_transform(Some(Ordinal(5)));
        let fragment = field.shader_fragment();
        assert!(fragment.required().iter().any(|s| s == "patientToTexture5"));
        assert!(fragment.required().iter().any(|s| s == "textureUnit5"));

        let mut composer = ShaderComposer::new();
        composer.push(fragment);
        assert!(composer.compose().is_err());

        composer.push(scalar(5).shader_fragment());
        let source = composer.compose().unwrap();
        assert!(source.contains("texture(textureUnit5, transformSTPPoint)"));
    }

    #[test]
    fn release_makes_the_field_dirty() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut field = scalar(0);
        field.field_to_texture(&mut ctx);
        field.release(&mut ctx);
        assert!(field.core().texture().is_none());
        assert!(field.needs_update());
        assert_eq!(ctx.live_texture_count(), 0);
    }
}
