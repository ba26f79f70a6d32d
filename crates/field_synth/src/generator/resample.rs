//! Resampling inputs onto the voxel grid of the outputs.
use glam::{Mat4, Vec3};

use crate::field::{FunctionFamily, Geometry, Ordinal, UniformDecl};
use crate::generator::{FragmentProgram, ProgramLayout};
use crate::uniforms::UniformMap;

/// Writes output `k` by sampling input `sources[k]` at each output voxel's patient position.
///
/// Sampling goes through the input's `sampleField` function, so the input's transform and
/// its own voxel grid are honoured. Outputs without a source are written as zero.
#[derive(Clone, Debug, PartialEq)]
pub struct ResampleProgram {
    sources: Vec<Ordinal>,
    output_texture_to_patient: Mat4,
    gradient_size: f32,
}

impl ResampleProgram {
    /// `output_texture_to_patient` maps output texture coordinates (slice coordinate in `z`)
    /// to patient space.
    pub fn new(sources: Vec<Ordinal>, output_texture_to_patient: Mat4) -> Self {
        Self {
            sources,
            output_texture_to_patient,
            gradient_size: 1.0,
        }
    }

    /// Resamples onto `geometry`, the grid shared by all outputs.
    pub fn onto(geometry: &Geometry, sources: Vec<Ordinal>) -> Self {
        let texture_to_pixel = Mat4::from_translation(Vec3::splat(-0.5))
            * Mat4::from_scale(geometry.dimensions.as_vec3());
        Self::new(sources, geometry.pixel_to_patient() * texture_to_pixel)
    }

    /// Central-difference step in voxels.
    pub fn with_gradient_size(mut self, gradient_size: f32) -> Self {
        self.gradient_size = gradient_size;
        self
    }

    pub fn sources(&self) -> &[Ordinal] {
        &self.sources
    }

    pub fn output_texture_to_patient(&self) -> Mat4 {
        self.output_texture_to_patient
    }
}

impl FragmentProgram for ResampleProgram {
    fn uniforms(&self, _layout: &ProgramLayout) -> Vec<UniformDecl> {
        vec![
            UniformDecl::new("mat4", "outputTextureToPatient"),
            UniformDecl::new("float", "gradientSize"),
        ]
    }

    fn requires(&self, layout: &ProgramLayout) -> Vec<String> {
        self.sources
            .iter()
            .take(layout.outputs)
            .flat_map(|n| [FunctionFamily::Sample.symbol(*n), n.suffix("textureUnit")])
            .collect()
    }

    fn main_body(&self, layout: &ProgramLayout) -> String {
        let mut body = String::from(concat!(
            "  vec3 patientPoint = ",
            "(outputTextureToPatient * vec4(interpolatedTextureCoordinate, 1.)).xyz;\n",
        ));
        for k in 0..layout.outputs {
            let Some(n) = self.sources.get(k) else {
                body.push_str(&format!("  {}\n", layout.store(k, "0")));
                continue;
            };
            let sample = FunctionFamily::Sample.symbol(*n);
            let unit = n.suffix("textureUnit");
            body.push_str(&format!(
                r#"  {{
    float sampleValue;
    vec3 normal;
    float gradientMagnitude;
    {sample}({unit}, patientPoint, gradientSize, sampleValue, normal, gradientMagnitude);
    {store}
  }}
"#,
                store = layout.store(k, "sampleValue")
            ));
        }
        body
    }

    fn values(&self) -> UniformMap {
        let mut values = UniformMap::new();
        values
            .insert("outputTextureToPatient", self.output_texture_to_patient)
            .insert("gradientSize", self.gradient_size);
        values
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec4};

    use super::*;
    use crate::generator::NumericMode;
    use crate::uniforms::UniformValue;

    fn layout(outputs: usize) -> ProgramLayout {
        ProgramLayout {
            formats: NumericMode::Integer.formats(),
            inputs: vec![Ordinal(3)],
            outputs,
        }
    }

    #[test]
    fn texture_centers_map_to_voxel_centers() {
        let geometry = Geometry::new(UVec3::new(4, 2, 1), Mat4::from_scale(Vec3::splat(0.5)));
        let program = ResampleProgram::onto(&geometry, vec![Ordinal(0)]);
        // Center of voxel (1, 0, 0) in texture space.
        let stp = Vec4::new(1.5 / 4.0, 0.5 / 2.0, 0.5, 1.0);
        let patient = program.output_texture_to_patient() * stp;
        assert!((patient.truncate() - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn body_samples_each_source_into_its_output() {
        let program = ResampleProgram::new(vec![Ordinal(3)], Mat4::IDENTITY);
        let body = program.main_body(&layout(2));
        assert!(body.contains("sampleField3(textureUnit3, patientPoint"));
        assert!(body.contains("fragmentOutput0 = int(sampleValue);"));
        assert!(body.contains("fragmentOutput1 = int(0);"));
        assert_eq!(
            program.requires(&layout(2)),
            vec!["sampleField3".to_string(), "textureUnit3".to_string()]
        );
    }

    #[test]
    fn publishes_its_uniform_values() {
        let program = ResampleProgram::new(vec![], Mat4::IDENTITY).with_gradient_size(0.5);
        let values = program.values();
        assert_eq!(values.get("gradientSize"), Some(&UniformValue::Float(0.5)));
        assert!(values.contains("outputTextureToPatient"));
        assert_eq!(program.uniforms(&layout(1)).len(), 2);
    }
}
