//! The GPU context seam.
//!
//! Context creation and extension probing happen outside this crate. Generators and fields
//! issue their work through [`GpuContext`], a command-issuing interface modelled on the
//! WebGL 2 / OpenGL ES 3 calls they need. [`headless::HeadlessContext`] is a CPU reference
//! implementation used by tests, benches and offline tools.
use std::fmt;

use glam::UVec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod headless;

pub use headless::{
    FragmentInput, FragmentKernel, HeadlessCommand, HeadlessContext, ReadbackSupport,
};

/// Handle to a 3D texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Handle to a vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Handle to an off-screen render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Handle to a shader object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

/// Handle to a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Resolved location of a uniform within a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Programmable pipeline stage.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Sized internal format of a texture.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    R16I,
    R32I,
    R32F,
    Rgb32F,
    Rgba8,
}

impl TextureFormat {
    /// Number of color components stored per texel.
    pub fn components(self) -> usize {
        match self {
            TextureFormat::R8
            | TextureFormat::R16I
            | TextureFormat::R32I
            | TextureFormat::R32F => 1,
            TextureFormat::Rgb32F => 3,
            TextureFormat::Rgba8 => 4,
        }
    }

    /// Whether the format is sampled through an integer sampler.
    pub fn is_integer(self) -> bool {
        matches!(self, TextureFormat::R16I | TextureFormat::R32I)
    }

    /// Whether the format can be attached as a color target.
    ///
    /// Float formats are only renderable when `float_color_buffers` is available.
    pub fn is_color_renderable(self, float_color_buffers: bool) -> bool {
        match self {
            TextureFormat::R8
            | TextureFormat::R16I
            | TextureFormat::R32I
            | TextureFormat::Rgba8 => true,
            TextureFormat::R32F => float_color_buffers,
            TextureFormat::Rgb32F => false,
        }
    }
}

/// Client-side pixel layout for uploads and readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Red,
    RedInteger,
    Rgb,
    Rgba,
    RgbaInteger,
}

impl PixelFormat {
    pub fn components(self) -> usize {
        match self {
            PixelFormat::Red | PixelFormat::RedInteger => 1,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::RgbaInteger => 4,
        }
    }
}

/// Client-side component type for uploads and readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelType {
    UnsignedByte,
    Short,
    Int,
    Float,
}

impl PixelType {
    pub fn bytes(self) -> usize {
        match self {
            PixelType::UnsignedByte => 1,
            PixelType::Short => 2,
            PixelType::Int | PixelType::Float => 4,
        }
    }
}

/// Texture minification/magnification filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Primitive topology for draw calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
}

/// Completeness of the bound off-screen target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDimensions,
    Unsupported,
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramebufferStatus::Complete => "FRAMEBUFFER_COMPLETE",
            FramebufferStatus::IncompleteAttachment => "FRAMEBUFFER_INCOMPLETE_ATTACHMENT",
            FramebufferStatus::MissingAttachment => "FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT",
            FramebufferStatus::IncompleteDimensions => "FRAMEBUFFER_INCOMPLETE_DIMENSIONS",
            FramebufferStatus::Unsupported => "FRAMEBUFFER_UNSUPPORTED",
        };
        f.write_str(name)
    }
}

/// Command-issuing GPU interface.
///
/// All calls are ordered on one command stream; the trait exposes no synchronization.
/// Texture calls operate on the texture bound to the active unit, framebuffer calls on
/// the bound framebuffer, and uniform calls on the program in use.
pub trait GpuContext {
    fn create_texture(&mut self) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture_3d(&mut self, texture: Option<TextureId>);
    fn tex_storage_3d(&mut self, format: TextureFormat, size: UVec3);
    fn tex_sub_image_3d(&mut self, size: UVec3, format: PixelFormat, ty: PixelType, data: &[u8]);
    fn tex_filter(&mut self, filter: Filter);

    /// Creates a static vertex buffer holding `data`.
    fn create_buffer(&mut self, data: &[f32]) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);
    /// Binds `buffer` to attribute `location` with `components` floats per vertex.
    fn vertex_attribute(&mut self, buffer: BufferId, location: u32, components: u32);

    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> ShaderId;
    /// Compiles a shader, returning the info log on failure.
    fn compile_shader(&mut self, shader: ShaderId) -> std::result::Result<(), String>;
    fn delete_shader(&mut self, shader: ShaderId);
    fn create_program(&mut self) -> ProgramId;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    /// Links a program, returning the info log on failure.
    fn link_program(&mut self, program: ProgramId) -> std::result::Result<(), String>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn uniform_1f(&mut self, location: UniformLocation, value: f32);
    fn uniform_1i(&mut self, location: UniformLocation, value: i32);
    fn uniform_1ui(&mut self, location: UniformLocation, value: u32);
    fn uniform_3fv(&mut self, location: UniformLocation, value: [f32; 3]);
    fn uniform_3iv(&mut self, location: UniformLocation, value: [i32; 3]);
    fn uniform_4fv(&mut self, location: UniformLocation, value: [f32; 4]);
    fn uniform_4iv(&mut self, location: UniformLocation, value: [i32; 4]);
    /// Column-major 3×3 matrix.
    fn uniform_matrix_3fv(&mut self, location: UniformLocation, value: [f32; 9]);
    /// Column-major 4×4 matrix.
    fn uniform_matrix_4fv(&mut self, location: UniformLocation, value: [f32; 16]);

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32);
    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    /// Attaches one layer of a 3D texture as color attachment `attachment`.
    fn framebuffer_texture_layer(
        &mut self,
        attachment: u32,
        texture: Option<TextureId>,
        level: u32,
        layer: u32,
    );
    fn draw_buffers(&mut self, attachments: &[u32]);
    fn check_framebuffer_status(&self) -> FramebufferStatus;
    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32);

    fn read_buffer(&mut self, attachment: u32);
    /// The format/type pair the context can read from the current read buffer without
    /// conversion.
    fn implementation_color_read_format(&self) -> (PixelFormat, PixelType);
    /// Reads a rectangle of the current read buffer into `dst` in native byte order.
    #[allow(clippy::too_many_arguments)]
    fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: PixelFormat,
        ty: PixelType,
        dst: &mut [u8],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_targets_need_color_buffer_float() {
        assert!(!TextureFormat::R32F.is_color_renderable(false));
        assert!(TextureFormat::R32F.is_color_renderable(true));
        assert!(TextureFormat::R16I.is_color_renderable(false));
        assert!(!TextureFormat::Rgb32F.is_color_renderable(true));
    }

    #[test]
    fn status_displays_gl_constant_names() {
        assert_eq!(
            FramebufferStatus::MissingAttachment.to_string(),
            "FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT"
        );
    }
}
