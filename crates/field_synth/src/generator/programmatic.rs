//! Slice-by-slice generation driven by a composed fragment program.
use glam::UVec3;
use tracing::{debug, info};

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::field::{Ordinal, ShaderComposer, SharedField, UniformDecl};
use crate::generator::readback::SliceReadback;
use crate::generator::{number_lines, GeneratorConfig, GeneratorFormats};
use crate::gpu::{
    BufferId, FramebufferId, FramebufferStatus, GpuContext, Primitive, ProgramId, ShaderId,
    ShaderStage, TextureId,
};
use crate::uniforms::{set_uniform, set_uniforms, UniformMap, UniformValue};

const VERTEX_SOURCE: &str = r#"#version 300 es
layout(location = 0) in vec3 coordinate;
layout(location = 1) in vec2 textureCoordinate;
uniform float slice;
out vec3 interpolatedTextureCoordinate;

void main()
{
  interpolatedTextureCoordinate = vec3(textureCoordinate, slice);
  gl_Position = vec4(coordinate, 1.);
}
"#;

const FRAGMENT_HEADER: &str = r#"#version 300 es
precision highp float;
precision highp int;
precision highp sampler3D;
precision highp isampler3D;

in vec3 interpolatedTextureCoordinate;
"#;

const QUAD_COORDINATES: [f32; 12] = [
    -1.0, -1.0, 0.0, //
    1.0, -1.0, 0.0, //
    -1.0, 1.0, 0.0, //
    1.0, 1.0, 0.0,
];

const QUAD_TEXTURE_COORDINATES: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// Slice coordinate of layer `slice` in a volume of `frames` layers: the layer center.
pub fn slice_parameter(slice: u32, frames: u32) -> f32 {
    (0.5 + slice as f32) / frames as f32
}

/// All slice coordinates of a volume with `frames` layers, in generation order.
pub fn slice_parameters(frames: u32) -> Vec<f32> {
    (0..frames).map(|i| slice_parameter(i, frames)).collect()
}

/// What a generator knows when a [`FragmentProgram`] writes its GLSL.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramLayout {
    pub formats: GeneratorFormats,
    /// Ordinals of the input fields, in input order.
    pub inputs: Vec<Ordinal>,
    /// Number of outputs; output `k` is written to color attachment `k`.
    pub outputs: usize,
}

impl ProgramLayout {
    /// Name of the fragment output bound to attachment `k`.
    pub fn output(&self, k: usize) -> String {
        format!("fragmentOutput{}", k)
    }

    /// Statement storing `expression` to output `k`, converted to the buffer type.
    pub fn store(&self, k: usize, expression: &str) -> String {
        format!(
            "{} = {}({});",
            self.output(k),
            self.formats.buffer_type,
            expression
        )
    }
}

/// The generator-specific part of a fragment program.
///
/// The generator supplies the header, the output declarations and the composed field
/// fragments; an implementation supplies the body of `main` plus whatever uniforms and
/// helper functions that body uses.
pub trait FragmentProgram {
    /// Uniforms the program itself declares.
    fn uniforms(&self, _layout: &ProgramLayout) -> Vec<UniformDecl> {
        Vec::new()
    }

    /// Field symbols the body calls. Composition fails if an input does not provide them.
    fn requires(&self, _layout: &ProgramLayout) -> Vec<String> {
        Vec::new()
    }

    /// Functions emitted after the field fragments and before `main`.
    fn helpers(&self, _layout: &ProgramLayout) -> String {
        String::new()
    }

    /// Statements of `main`, writing every output.
    fn main_body(&self, layout: &ProgramLayout) -> String;

    /// Values of the program's own uniforms, uploaded before generator-wide ones.
    fn values(&self) -> UniformMap {
        UniformMap::new()
    }
}

/// Outcome of one [`ProgrammaticGenerator::generate`] call.
#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerateSummary {
    /// Slices drawn.
    pub slices: u32,
    /// Slice readbacks using the compact native format.
    pub native_reads: u32,
    /// Slice readbacks using the four-component fallback.
    pub fallback_reads: u32,
    /// Slices skipped because the render target was incomplete.
    pub incomplete_slices: u32,
}

#[derive(Clone, Copy, Debug)]
struct Quad {
    coordinates: BufferId,
    texture_coordinates: BufferId,
    framebuffer: FramebufferId,
}

impl Quad {
    fn create(ctx: &mut dyn GpuContext) -> Self {
        Self {
            coordinates: ctx.create_buffer(&QUAD_COORDINATES),
            texture_coordinates: ctx.create_buffer(&QUAD_TEXTURE_COORDINATES),
            framebuffer: ctx.create_framebuffer(),
        }
    }

    fn delete(self, ctx: &mut dyn GpuContext) {
        ctx.delete_buffer(self.coordinates);
        ctx.delete_buffer(self.texture_coordinates);
        ctx.delete_framebuffer(self.framebuffer);
    }
}

/// Populates output fields by running a fragment program once per output slice.
///
/// The fragment shader is rebuilt from the inputs' fragments by
/// [`update_program`](Self::update_program); call it again whenever the set of inputs or
/// their transforms change. [`generate`](Self::generate) renders every slice into the
/// outputs' textures and copies them to CPU buffers where an output keeps one.
///
/// A field must not be both an input and an output of the same generator.
pub struct ProgrammaticGenerator {
    config: GeneratorConfig,
    formats: GeneratorFormats,
    program_source: Box<dyn FragmentProgram>,
    inputs: Vec<SharedField>,
    outputs: Vec<SharedField>,
    program: Option<ProgramId>,
    fragment_source: Option<String>,
    quad: Option<Quad>,
}

impl ProgrammaticGenerator {
    pub fn new<P>(
        ctx: &mut dyn GpuContext,
        config: GeneratorConfig,
        program: P,
        inputs: Vec<SharedField>,
        outputs: Vec<SharedField>,
    ) -> Result<Self>
    where
        P: FragmentProgram + 'static,
    {
        config.validate()?;
        if outputs.is_empty() {
            return Err(Error::InvalidConfig(
                "a generator needs at least one output field".into(),
            ));
        }
        for output in &outputs {
            output.borrow_mut().core_mut().set_generator(config.label.clone());
        }
        Ok(Self {
            formats: config.formats(),
            config,
            program_source: Box::new(program),
            inputs,
            outputs,
            program: None,
            fragment_source: None,
            quad: Some(Quad::create(ctx)),
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn formats(&self) -> GeneratorFormats {
        self.formats
    }

    pub fn inputs(&self) -> &[SharedField] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SharedField] {
        &self.outputs
    }

    /// The linked program, absent before a successful [`update_program`](Self::update_program).
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn vertex_source(&self) -> &'static str {
        VERTEX_SOURCE
    }

    /// Fragment source of the last composition attempt that got past composition.
    pub fn fragment_source(&self) -> Option<&str> {
        self.fragment_source.as_deref()
    }

    pub fn layout(&self) -> ProgramLayout {
        ProgramLayout {
            formats: self.formats,
            inputs: self.inputs.iter().map(|f| f.borrow().ordinal()).collect(),
            outputs: self.outputs.len(),
        }
    }

    /// Composes the complete fragment shader for the current inputs.
    pub fn compose_fragment_source(&self) -> Result<String> {
        let layout = self.layout();
        let mut composer = ShaderComposer::new();
        for input in &self.inputs {
            composer.push(input.borrow().shader_fragment());
        }
        for decl in self.program_source.uniforms(&layout) {
            composer.provide_uniform(decl);
        }
        for symbol in self.program_source.requires(&layout) {
            composer.require(symbol);
        }
        let fields = composer.compose()?;

        let mut source = String::from(FRAGMENT_HEADER);
        for k in 0..layout.outputs {
            source.push_str(&format!(
                "layout(location = {}) out {} {};\n",
                k,
                self.formats.buffer_type,
                layout.output(k)
            ));
        }
        source.push('\n');
        source.push_str(&fields);
        let helpers = self.program_source.helpers(&layout);
        if !helpers.trim().is_empty() {
            source.push_str(helpers.trim_end());
            source.push('\n');
        }
        source.push_str("\nvoid main()\n{\n");
        source.push_str(self.program_source.main_body(&layout).trim_end());
        source.push_str("\n}\n");
        Ok(source)
    }

    /// Rebuilds the program. Returns `false`, leaving the generator without a program, if
    /// composition, compilation or linking fails.
    pub fn update_program(&mut self, ctx: &mut dyn GpuContext) -> bool {
        self.update_program_with_diagnostics(ctx, &mut ())
    }

    pub fn update_program_with_diagnostics(
        &mut self,
        ctx: &mut dyn GpuContext,
        sink: &mut dyn DiagnosticSink,
    ) -> bool {
        match self.rebuild(ctx, sink) {
            Ok(()) => true,
            Err(err) => {
                report(sink, build_failure(err));
                false
            }
        }
    }

    /// Rebuilds the program, returning the composition, compile or link error that stopped
    /// it. On error the generator is left without a program.
    pub fn try_update_program(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        self.rebuild(ctx, &mut ())
    }

    fn rebuild(&mut self, ctx: &mut dyn GpuContext, sink: &mut dyn DiagnosticSink) -> Result<()> {
        self.release_program(ctx);
        if self.quad.is_none() {
            self.quad = Some(Quad::create(ctx));
        }

        let fragment_source = self.compose_fragment_source()?;
        self.fragment_source = Some(fragment_source.clone());
        self.program = Some(build_program(ctx, &fragment_source)?);

        for input in &self.inputs {
            input
                .borrow_mut()
                .field_to_texture_with_diagnostics(ctx, sink);
        }
        info!(
            "Generator '{}' linked a program over {} inputs and {} outputs.",
            self.config.label,
            self.inputs.len(),
            self.outputs.len()
        );
        Ok(())
    }

    /// Renders every slice of the outputs.
    pub fn generate(&mut self, ctx: &mut dyn GpuContext) -> GenerateSummary {
        self.generate_with_diagnostics(ctx, &mut ())
    }

    pub fn generate_with_diagnostics(
        &mut self,
        ctx: &mut dyn GpuContext,
        sink: &mut dyn DiagnosticSink,
    ) -> GenerateSummary {
        let mut summary = GenerateSummary::default();
        let (Some(program), Some(quad)) = (self.program, self.quad) else {
            report(
                sink,
                Diagnostic::MissingProgram {
                    generator: self.config.label.clone(),
                },
            );
            return summary;
        };

        for output in &self.outputs {
            output
                .borrow_mut()
                .field_to_texture_with_diagnostics(ctx, sink);
        }
        let targets: Vec<(Option<TextureId>, UVec3)> = self
            .outputs
            .iter()
            .map(|f| {
                let field = f.borrow();
                (field.core().texture(), field.core().dimensions())
            })
            .collect();
        let size = targets[0].1;
        if size.x == 0 || size.y == 0 {
            debug!(
                "Generator '{}' has an empty first output; nothing to draw.",
                self.config.label
            );
            return summary;
        }

        ctx.use_program(program);
        ctx.viewport(0, 0, size.x, size.y);
        ctx.vertex_attribute(quad.coordinates, 0, 3);
        ctx.vertex_attribute(quad.texture_coordinates, 1, 2);

        set_uniforms(ctx, program, &self.program_source.values());
        set_uniforms(ctx, program, &self.config.uniforms);
        for input in &self.inputs {
            set_uniforms(ctx, program, &input.borrow().uniforms());
        }
        for input in &self.inputs {
            let field = input.borrow();
            let ordinal = field.ordinal();
            ctx.active_texture(ordinal.texture_unit());
            ctx.bind_texture_3d(field.core().texture());
            set_uniform(
                ctx,
                program,
                &ordinal.suffix("textureUnit"),
                &UniformValue::Int(ordinal.texture_unit() as i32),
            );
        }

        let attachments: Vec<u32> = (0..targets.len() as u32).collect();
        let mut readback = SliceReadback::new(self.formats);
        for slice in 0..size.z {
            set_uniform(
                ctx,
                program,
                "slice",
                &UniformValue::Float(slice_parameter(slice, size.z)),
            );
            ctx.bind_framebuffer(Some(quad.framebuffer));
            for (k, (texture, _)) in targets.iter().enumerate() {
                ctx.framebuffer_texture_layer(k as u32, *texture, 0, slice);
            }
            ctx.draw_buffers(&attachments);

            let status = ctx.check_framebuffer_status();
            if status != FramebufferStatus::Complete {
                report(sink, Diagnostic::IncompleteFramebuffer { slice, status });
                summary.incomplete_slices += 1;
                continue;
            }
            ctx.draw_arrays(Primitive::TriangleStrip, 0, 4);
            summary.slices += 1;

            for (k, output) in self.outputs.iter().enumerate() {
                let (_, dimensions) = targets[k];
                let range = readback.slice_range(slice, dimensions.x, dimensions.y);
                let mut field = output.borrow_mut();
                let Some(buffer) = field.readback_buffer_mut() else {
                    continue;
                };
                let Some(dst) = buffer.get_mut(range) else {
                    debug!("Readback buffer of output {} is too small for slice {}.", k, slice);
                    continue;
                };
                readback.read_slice(ctx, k, dimensions.x, dimensions.y, dst, sink);
            }
        }
        ctx.bind_framebuffer(None);

        summary.native_reads = readback.native_reads();
        summary.fallback_reads = readback.fallback_reads();
        debug!(
            "Generator '{}' drew {} slices ({} native, {} fallback reads).",
            self.config.label, summary.slices, summary.native_reads, summary.fallback_reads
        );
        summary
    }

    /// Deletes the program, quad buffers and framebuffer. Field textures are owned by
    /// the fields and left alone. [`update_program`](Self::update_program) recreates
    /// everything.
    pub fn release(&mut self, ctx: &mut dyn GpuContext) {
        self.release_program(ctx);
        if let Some(quad) = self.quad.take() {
            quad.delete(ctx);
        }
    }

    fn release_program(&mut self, ctx: &mut dyn GpuContext) {
        if let Some(program) = self.program.take() {
            ctx.delete_program(program);
        }
    }
}

fn compile_stage(ctx: &mut dyn GpuContext, stage: ShaderStage, source: &str) -> Result<ShaderId> {
    let shader = ctx.create_shader(stage, source);
    if let Err(log) = ctx.compile_shader(shader) {
        ctx.delete_shader(shader);
        return Err(Error::Compile {
            stage,
            listing: number_lines(source),
            log,
        });
    }
    Ok(shader)
}

/// Compiles both stages and links them. Shaders are deleted once attached; a program that
/// fails to link is deleted too.
fn build_program(ctx: &mut dyn GpuContext, fragment_source: &str) -> Result<ProgramId> {
    let vertex = compile_stage(ctx, ShaderStage::Vertex, VERTEX_SOURCE)?;
    let fragment = match compile_stage(ctx, ShaderStage::Fragment, fragment_source) {
        Ok(shader) => shader,
        Err(err) => {
            ctx.delete_shader(vertex);
            return Err(err);
        }
    };

    let program = ctx.create_program();
    ctx.attach_shader(program, vertex);
    ctx.attach_shader(program, fragment);
    ctx.delete_shader(vertex);
    ctx.delete_shader(fragment);
    if let Err(log) = ctx.link_program(program) {
        ctx.delete_program(program);
        return Err(Error::Link {
            listing: number_lines(fragment_source),
            log,
        });
    }
    Ok(program)
}

fn build_failure(err: Error) -> Diagnostic {
    match err {
        Error::Compile {
            stage,
            listing,
            log,
        } => Diagnostic::ShaderCompileFailed {
            stage,
            listing,
            log,
        },
        Error::Link { listing, log } => Diagnostic::ProgramLinkFailed { listing, log },
        other => Diagnostic::CompositionFailed {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use glam::Mat4;

    use super::*;
    use crate::capabilities::Capabilities;
    use crate::diagnostics::{DiagnosticKind, VecSink};
    use crate::field::{shared, ImageField};
    use crate::generator::NumericMode;
    use crate::gpu::{HeadlessCommand, HeadlessContext};

    /// Writes the slice coordinate to every output.
    struct SliceIndex;

    impl FragmentProgram for SliceIndex {
        fn main_body(&self, layout: &ProgramLayout) -> String {
            (0..layout.outputs)
                .map(|k| format!("  {}\n", layout.store(k, "interpolatedTextureCoordinate.z")))
                .collect()
        }
    }

    fn output(n: u32, size: UVec3) -> SharedField {
        shared(ImageField::generated(
            Ordinal(n),
            NumericMode::Float,
            size,
            Mat4::IDENTITY,
            true,
        ))
    }

    fn generator(ctx: &mut HeadlessContext, outputs: Vec<SharedField>) -> ProgrammaticGenerator {
        ProgrammaticGenerator::new(
            ctx,
            GeneratorConfig::new(NumericMode::Float).with_label("slices"),
            SliceIndex,
            Vec::new(),
            outputs,
        )
        .unwrap()
    }

    #[test]
    fn slice_parameters_are_layer_centers() {
        assert_eq!(slice_parameters(4), vec![0.125, 0.375, 0.625, 0.875]);
        assert_eq!(slice_parameter(0, 1), 0.5);
    }

    #[test]
    fn stores_convert_to_the_buffer_type() {
        let layout = ProgramLayout {
            formats: NumericMode::Integer.formats(),
            inputs: vec![],
            outputs: 1,
        };
        assert_eq!(layout.store(0, "v"), "fragmentOutput0 = int(v);");
    }

    #[test]
    fn fragment_source_declares_each_output() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let outputs = vec![output(0, UVec3::ONE), output(1, UVec3::ONE)];
        let generator = generator(&mut ctx, outputs);
        let source = generator.compose_fragment_source().unwrap();
        assert!(source.starts_with("#version 300 es"));
        assert!(source.contains("layout(location = 1) out float fragmentOutput1;"));
        assert!(source.contains("fragmentOutput1 = float(interpolatedTextureCoordinate.z);"));
    }

    #[test]
    fn outputs_record_their_generator() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let field = output(0, UVec3::ONE);
        let _generator = generator(&mut ctx, vec![field.clone()]);
        assert_eq!(field.borrow().core().generator(), Some("slices"));
    }

    #[test]
    fn rejects_a_generator_without_outputs() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let result = ProgrammaticGenerator::new(
            &mut ctx,
            GeneratorConfig::default(),
            SliceIndex,
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn generate_without_program_reports_and_draws_nothing() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut generator = generator(&mut ctx, vec![output(0, UVec3::ONE)]);
        let mut sink = VecSink::new();
        let summary = generator.generate_with_diagnostics(&mut ctx, &mut sink);
        assert_eq!(summary, GenerateSummary::default());
        assert_eq!(sink.count(DiagnosticKind::MissingProgram), 1);
        assert!(!ctx
            .commands()
            .iter()
            .any(|c| matches!(c, HeadlessCommand::Draw { .. })));
    }

    #[test]
    fn generates_every_slice_and_reads_it_back() {
        let mut ctx = HeadlessContext::new(&Capabilities::default())
            .with_fragment_kernel(|input| [input.coordinate.z, 0.0, 0.0, 1.0]);
        let image = Rc::new(RefCell::new(ImageField::generated(
            Ordinal(0),
            NumericMode::Float,
            UVec3::new(2, 2, 3),
            Mat4::IDENTITY,
            true,
        )));
        let mut generator = generator(&mut ctx, vec![image.clone() as SharedField]);
        assert!(generator.update_program(&mut ctx));

        let summary = generator.generate(&mut ctx);
        assert_eq!(summary.slices, 3);
        assert_eq!(summary.native_reads, 3);
        assert_eq!(summary.fallback_reads, 0);
        assert_eq!(ctx.slice_parameters(), slice_parameters(3));

        let values = image.borrow().generated_values().unwrap();
        assert_eq!(values.len(), 12);
        assert_eq!(&values[..4], &[0.5 / 3.0; 4]);
        assert_eq!(&values[8..], &[2.5 / 3.0; 4]);
    }

    #[test]
    fn try_update_program_returns_the_compile_error() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        ctx.fail_compile_on("fragmentOutput0");
        let mut generator = generator(&mut ctx, vec![output(0, UVec3::ONE)]);
        match generator.try_update_program(&mut ctx) {
            Err(Error::Compile { stage, listing, .. }) => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(listing.starts_with("   1: #version 300 es"));
            }
            other => panic!("expected a compile error, got {other:?}"),
        }
        assert!(generator.program().is_none());
        assert!(generator.fragment_source().is_some());
    }

    #[test]
    fn try_update_program_returns_the_link_error() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        ctx.fail_link(true);
        let mut generator = generator(&mut ctx, vec![output(0, UVec3::ONE)]);
        let err = generator.try_update_program(&mut ctx).unwrap_err();
        assert!(matches!(err, Error::Link { .. }));

        let mut sink = VecSink::new();
        assert!(!generator.update_program_with_diagnostics(&mut ctx, &mut sink));
        assert_eq!(sink.count(DiagnosticKind::ProgramLinkFailed), 1);
        assert_eq!(sink.worst(), Some(crate::diagnostics::Severity::Error));
    }

    #[test]
    fn release_deletes_the_program() {
        let mut ctx = HeadlessContext::new(&Capabilities::default());
        let mut generator = generator(&mut ctx, vec![output(0, UVec3::ONE)]);
        assert!(generator.update_program(&mut ctx));
        let program = generator.program().unwrap();
        generator.release(&mut ctx);
        generator.release(&mut ctx);
        assert!(!ctx.is_program_live(program));
        assert!(generator.program().is_none());
    }
}
