//! CPU reference implementation of [`GpuContext`].
//!
//! [`HeadlessContext`] keeps texture storage in host memory, resolves uniform locations from
//! the `uniform` declarations of the linked sources, performs a light syntax check on shader
//! sources, tracks framebuffer completeness, and answers native read-format queries. Draw calls
//! run a Rust [`FragmentKernel`] once per covered pixel and draw buffer, standing in for the
//! fragment program. Every call is recorded as a [`HeadlessCommand`] so tests can assert on the
//! exact command stream.
use std::collections::{BTreeMap, HashMap};

use glam::{UVec3, Vec3};
use tracing::debug;

use crate::capabilities::Capabilities;
use crate::gpu::{
    BufferId, Filter, FramebufferId, FramebufferStatus, GpuContext, PixelFormat, PixelType,
    Primitive, ProgramId, ShaderId, ShaderStage, TextureFormat, TextureId, UniformLocation,
};
use crate::uniforms::UniformValue;

/// Stand-in for a fragment program: returns the RGBA value written to one draw buffer.
pub type FragmentKernel = Box<dyn Fn(&FragmentInput<'_>) -> [f32; 4]>;

/// A recorded call.
#[derive(Clone, Debug, PartialEq)]
pub enum HeadlessCommand {
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    ActiveTexture(u32),
    BindTexture(Option<TextureId>),
    TexStorage {
        format: TextureFormat,
        size: UVec3,
    },
    TexSubImage {
        size: UVec3,
        format: PixelFormat,
        ty: PixelType,
        bytes: usize,
    },
    TexFilter(Filter),
    VertexAttribute {
        buffer: BufferId,
        location: u32,
        components: u32,
    },
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    /// A uniform write; `setter` names the context call that made it.
    Uniform {
        setter: &'static str,
        name: String,
        value: UniformValue,
    },
    Viewport {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    BindFramebuffer(Option<FramebufferId>),
    AttachLayer {
        attachment: u32,
        texture: Option<TextureId>,
        layer: u32,
    },
    DrawBuffers(Vec<u32>),
    Draw {
        primitive: Primitive,
        first: u32,
        count: u32,
    },
    ReadBuffer(u32),
    ReadPixels {
        format: PixelFormat,
        ty: PixelType,
    },
}

/// How the context answers native read-format queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadbackSupport {
    /// Reports the compact single-component format matching the read attachment.
    #[default]
    Native,
    /// Reports only four-component formats, like drivers that cannot read single channels.
    RgbaOnly,
}

/// Everything a [`FragmentKernel`] can see for one fragment.
pub struct FragmentInput<'a> {
    /// Interpolated texture coordinate; `z` is the `slice` uniform.
    pub coordinate: Vec3,
    /// Window-space pixel.
    pub pixel: (u32, u32),
    /// Draw buffer slot, i.e. the fragment output location.
    pub attachment: usize,
    uniforms: &'a HashMap<String, UniformValue>,
    textures: &'a HashMap<TextureId, Texture>,
    units: &'a HashMap<u32, TextureId>,
}

impl FragmentInput<'_> {
    /// Value of a uniform set on the current program.
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    /// Nearest-texel lookup of the texture bound to `unit`, clamped to edge.
    /// Unbound units read as zero.
    pub fn sample(&self, unit: u32, stp: Vec3) -> [f32; 4] {
        let Some(texture) = self.units.get(&unit).and_then(|id| self.textures.get(id)) else {
            return [0.0; 4];
        };
        let size = texture.size;
        if texture.format.is_none() || size.x == 0 || size.y == 0 || size.z == 0 {
            return [0.0; 4];
        }
        let ix = nearest(stp.x, size.x);
        let iy = nearest(stp.y, size.y);
        let iz = nearest(stp.z, size.z);
        texture.texels[texel_index(size, ix, iy, iz)]
    }
}

fn nearest(coordinate: f32, extent: u32) -> u32 {
    let i = (coordinate * extent as f32).floor();
    (i.max(0.0) as u32).min(extent - 1)
}

fn texel_index(size: UVec3, x: u32, y: u32, z: u32) -> usize {
    ((z as usize * size.y as usize) + y as usize) * size.x as usize + x as usize
}

struct Texture {
    format: Option<TextureFormat>,
    size: UVec3,
    texels: Vec<[f32; 4]>,
}

struct AttachedShader {
    stage: ShaderStage,
    source: String,
    compiled: bool,
}

struct Shader {
    stage: ShaderStage,
    source: String,
    compiled: bool,
}

#[derive(Default)]
struct Program {
    attached: Vec<AttachedShader>,
    linked: bool,
    uniforms: Vec<String>,
    values: HashMap<String, UniformValue>,
}

#[derive(Default)]
struct Framebuffer {
    attachments: BTreeMap<u32, (TextureId, u32)>,
    draw_buffers: Vec<u32>,
    read_buffer: u32,
}

/// CPU reference [`GpuContext`].
pub struct HeadlessContext {
    float_color_buffers: bool,
    readback: ReadbackSupport,
    fail_compile_marker: Option<String>,
    fail_link: bool,
    kernel: Option<FragmentKernel>,
    next_id: u32,
    textures: HashMap<TextureId, Texture>,
    buffers: HashMap<BufferId, Vec<f32>>,
    shaders: HashMap<ShaderId, Shader>,
    programs: HashMap<ProgramId, Program>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    units: HashMap<u32, TextureId>,
    active_unit: u32,
    current_program: Option<ProgramId>,
    bound_framebuffer: Option<FramebufferId>,
    viewport: (i32, i32, u32, u32),
    commands: Vec<HeadlessCommand>,
}

impl HeadlessContext {
    pub fn new(capabilities: &Capabilities) -> Self {
        Self {
            float_color_buffers: capabilities.float_color_buffers(),
            readback: ReadbackSupport::Native,
            fail_compile_marker: None,
            fail_link: false,
            kernel: None,
            next_id: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            units: HashMap::new(),
            active_unit: 0,
            current_program: None,
            bound_framebuffer: None,
            viewport: (0, 0, 0, 0),
            commands: Vec::new(),
        }
    }

    /// Sets how native read-format queries are answered.
    pub fn with_readback_support(mut self, readback: ReadbackSupport) -> Self {
        self.readback = readback;
        self
    }

    /// Sets the kernel run for every covered fragment on draw.
    pub fn with_fragment_kernel<F>(mut self, kernel: F) -> Self
    where
        F: Fn(&FragmentInput<'_>) -> [f32; 4] + 'static,
    {
        self.kernel = Some(Box::new(kernel));
        self
    }

    pub fn set_fragment_kernel<F>(&mut self, kernel: F)
    where
        F: Fn(&FragmentInput<'_>) -> [f32; 4] + 'static,
    {
        self.kernel = Some(Box::new(kernel));
    }

    /// Makes any shader whose source contains `marker` fail to compile.
    pub fn fail_compile_on(&mut self, marker: impl Into<String>) {
        self.fail_compile_marker = Some(marker.into());
    }

    /// Makes every subsequent link fail.
    pub fn fail_link(&mut self, fail: bool) {
        self.fail_link = fail;
    }

    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<HeadlessCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Values written to the `slice` uniform, in order.
    pub fn slice_parameters(&self) -> Vec<f32> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                HeadlessCommand::Uniform { name, value, .. } if name == "slice" => value.as_f32(),
                _ => None,
            })
            .collect()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn is_program_live(&self, program: ProgramId) -> bool {
        self.programs.contains_key(&program)
    }

    pub fn texture_format(&self, texture: TextureId) -> Option<TextureFormat> {
        self.textures.get(&texture).and_then(|t| t.format)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<UVec3> {
        self.textures.get(&texture).map(|t| t.size)
    }

    /// Stored texels of a texture (`x` fastest, then `y`, then layer).
    pub fn texture_texels(&self, texture: TextureId) -> Option<&[[f32; 4]]> {
        self.textures.get(&texture).map(|t| t.texels.as_slice())
    }

    /// Texture bound to a texture unit.
    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(&unit).copied()
    }

    /// Last value set for `name` on `program`.
    pub fn program_uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs
            .get(&program)
            .and_then(|p| p.values.get(name))
            .copied()
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bound_texture_mut(&mut self) -> Option<&mut Texture> {
        let id = self.units.get(&self.active_unit)?;
        self.textures.get_mut(id)
    }

    fn read_attachment(&self) -> Option<(&Texture, u32)> {
        let fb = self.framebuffers.get(&self.bound_framebuffer?)?;
        let (texture, layer) = fb.attachments.get(&fb.read_buffer)?;
        self.textures.get(texture).map(|t| (t, *layer))
    }

    fn set_uniform_value(
        &mut self,
        setter: &'static str,
        location: UniformLocation,
        value: UniformValue,
    ) {
        let Some(program) = self
            .current_program
            .and_then(|id| self.programs.get_mut(&id))
        else {
            debug!("Uniform set with no program in use.");
            return;
        };
        let Some(name) = program.uniforms.get(location.0 as usize).cloned() else {
            debug!("Uniform location {} is not valid.", location.0);
            return;
        };
        program.values.insert(name.clone(), value);
        self.commands.push(HeadlessCommand::Uniform {
            setter,
            name,
            value,
        });
    }
}

/// Texel count of a `size` volume, multiplied in `usize`.
fn texel_count(size: UVec3) -> usize {
    size.x as usize * size.y as usize * size.z as usize
}

fn quantize(format: Option<TextureFormat>, value: [f32; 4]) -> [f32; 4] {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() / 255.0;
    match format {
        Some(TextureFormat::R8) => [unorm(value[0]), 0.0, 0.0, 1.0],
        Some(TextureFormat::R16I) => [(value[0] as i16) as f32, 0.0, 0.0, 1.0],
        Some(TextureFormat::R32I) => [(value[0] as i32) as f32, 0.0, 0.0, 1.0],
        Some(TextureFormat::R32F) => [value[0], 0.0, 0.0, 1.0],
        Some(TextureFormat::Rgb32F) => [value[0], value[1], value[2], 1.0],
        Some(TextureFormat::Rgba8) => value.map(unorm),
        None => value,
    }
}

fn decode_upload(
    format: PixelFormat,
    ty: PixelType,
    normalized: bool,
    data: &[u8],
) -> Vec<[f32; 4]> {
    let components = format.components();
    let size = ty.bytes();
    data.chunks_exact(components * size)
        .map(|pixel| {
            let mut texel = [0.0, 0.0, 0.0, 1.0];
            for (c, bytes) in pixel.chunks_exact(size).enumerate() {
                texel[c] = match ty {
                    PixelType::UnsignedByte if normalized => bytes[0] as f32 / 255.0,
                    PixelType::UnsignedByte => bytes[0] as f32,
                    PixelType::Short => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32,
                    PixelType::Int => {
                        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    }
                    PixelType::Float => {
                        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                    }
                };
            }
            texel
        })
        .collect()
}

fn encode_component(value: f32, ty: PixelType, normalized: bool, out: &mut [u8]) {
    match ty {
        PixelType::UnsignedByte if normalized => {
            out[0] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        PixelType::UnsignedByte => out[0] = value as u8,
        PixelType::Short => out.copy_from_slice(&(value as i16).to_ne_bytes()),
        PixelType::Int => out.copy_from_slice(&(value as i32).to_ne_bytes()),
        PixelType::Float => out.copy_from_slice(&value.to_ne_bytes()),
    }
}

fn is_normalized(format: Option<TextureFormat>) -> bool {
    matches!(format, Some(TextureFormat::R8) | Some(TextureFormat::Rgba8))
}

/// Reports the first unbalanced brace or parenthesis, GLSL-compiler style.
fn check_balanced(source: &str) -> Option<String> {
    let mut braces = 0i32;
    let mut parens = 0i32;
    let mut last_line = 0;
    for (n, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or("");
        for ch in code.chars() {
            match ch {
                '{' => braces += 1,
                '}' => braces -= 1,
                '(' => parens += 1,
                ')' => parens -= 1,
                _ => {}
            }
            if braces < 0 || parens < 0 {
                return Some(format!("ERROR: 0:{}: '{}' : syntax error", n + 1, ch));
            }
        }
        last_line = n + 1;
    }
    if braces != 0 || parens != 0 {
        return Some(format!(
            "ERROR: 0:{}: '' : syntax error: unexpected end of file",
            last_line
        ));
    }
    None
}

/// Names of the uniforms declared one per line in `source`.
fn declared_uniforms(source: &str, out: &mut Vec<String>) {
    for line in source.lines() {
        let Some(rest) = line.trim().strip_prefix("uniform ") else {
            continue;
        };
        let declaration = rest.split(';').next().unwrap_or("");
        let Some(name) = declaration.split_whitespace().last() else {
            continue;
        };
        let name = name.split('[').next().unwrap_or(name);
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
}

impl GpuContext for HeadlessContext {
    fn create_texture(&mut self) -> TextureId {
        let id = TextureId(self.next_handle());
        self.textures.insert(
            id,
            Texture {
                format: None,
                size: UVec3::ZERO,
                texels: Vec::new(),
            },
        );
        self.commands.push(HeadlessCommand::CreateTexture(id));
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.units.retain(|_, bound| *bound != texture);
        self.commands.push(HeadlessCommand::DeleteTexture(texture));
    }

    fn active_texture(&mut self, unit: u32) {
        self.active_unit = unit;
        self.commands.push(HeadlessCommand::ActiveTexture(unit));
    }

    fn bind_texture_3d(&mut self, texture: Option<TextureId>) {
        match texture {
            Some(id) => {
                self.units.insert(self.active_unit, id);
            }
            None => {
                self.units.remove(&self.active_unit);
            }
        }
        self.commands.push(HeadlessCommand::BindTexture(texture));
    }

    fn tex_storage_3d(&mut self, format: TextureFormat, size: UVec3) {
        self.commands
            .push(HeadlessCommand::TexStorage { format, size });
        let Some(texture) = self.bound_texture_mut() else {
            debug!("texStorage3D with no texture bound.");
            return;
        };
        texture.format = Some(format);
        texture.size = size;
        texture.texels = vec![quantize(Some(format), [0.0; 4]); texel_count(size)];
    }

    fn tex_sub_image_3d(&mut self, size: UVec3, format: PixelFormat, ty: PixelType, data: &[u8]) {
        self.commands.push(HeadlessCommand::TexSubImage {
            size,
            format,
            ty,
            bytes: data.len(),
        });
        let Some(texture) = self.bound_texture_mut() else {
            debug!("texSubImage3D with no texture bound.");
            return;
        };
        if texture.format.is_none() || size.cmpgt(texture.size).any() {
            debug!("texSubImage3D outside allocated storage.");
            return;
        }
        let normalized = is_normalized(texture.format);
        let decoded = decode_upload(format, ty, normalized, data);
        let storage = texture.format;
        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let src = texel_index(size, x, y, z);
                    let Some(value) = decoded.get(src) else {
                        return;
                    };
                    let dst = texel_index(texture.size, x, y, z);
                    texture.texels[dst] = quantize(storage, *value);
                }
            }
        }
    }

    fn tex_filter(&mut self, filter: Filter) {
        self.commands.push(HeadlessCommand::TexFilter(filter));
    }

    fn create_buffer(&mut self, data: &[f32]) -> BufferId {
        let id = BufferId(self.next_handle());
        self.buffers.insert(id, data.to_vec());
        id
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn vertex_attribute(&mut self, buffer: BufferId, location: u32, components: u32) {
        self.commands.push(HeadlessCommand::VertexAttribute {
            buffer,
            location,
            components,
        });
    }

    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> ShaderId {
        let id = ShaderId(self.next_handle());
        self.shaders.insert(
            id,
            Shader {
                stage,
                source: source.to_string(),
                compiled: false,
            },
        );
        id
    }

    fn compile_shader(&mut self, shader: ShaderId) -> std::result::Result<(), String> {
        let Some(entry) = self.shaders.get_mut(&shader) else {
            return Err(format!("ERROR: invalid shader {}", shader.0));
        };
        if let Some(marker) = self.fail_compile_marker.as_deref() {
            if let Some(n) = entry.source.lines().position(|l| l.contains(marker)) {
                return Err(format!("ERROR: 0:{}: '{}' : syntax error", n + 1, marker));
            }
        }
        if let Some(log) = check_balanced(&entry.source) {
            return Err(log);
        }
        entry.compiled = true;
        Ok(())
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn create_program(&mut self) -> ProgramId {
        let id = ProgramId(self.next_handle());
        self.programs.insert(id, Program::default());
        id
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        let Some(source) = self.shaders.get(&shader) else {
            return;
        };
        let attached = AttachedShader {
            stage: source.stage,
            source: source.source.clone(),
            compiled: source.compiled,
        };
        if let Some(p) = self.programs.get_mut(&program) {
            p.attached.push(attached);
        }
    }

    fn link_program(&mut self, program: ProgramId) -> std::result::Result<(), String> {
        let fail_link = self.fail_link;
        let Some(p) = self.programs.get_mut(&program) else {
            return Err(format!("ERROR: invalid program {}", program.0));
        };
        if fail_link {
            return Err(
                "ERROR: Implementation limit of 16 active fragment shader samplers exceeded".into(),
            );
        }
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let Some(shader) = p.attached.iter().find(|s| s.stage == stage) else {
                return Err(format!("ERROR: Missing {} shader", stage));
            };
            if !shader.compiled {
                return Err(format!("ERROR: {} shader is not compiled", stage));
            }
            if !shader.source.contains("void main") {
                return Err("ERROR: Missing main()".into());
            }
        }
        let mut uniforms = Vec::new();
        for shader in &p.attached {
            declared_uniforms(&shader.source, &mut uniforms);
        }
        p.uniforms = uniforms;
        p.values.clear();
        p.linked = true;
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.commands.push(HeadlessCommand::DeleteProgram(program));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
        self.commands.push(HeadlessCommand::UseProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let p = self.programs.get(&program)?;
        if !p.linked {
            return None;
        }
        p.uniforms
            .iter()
            .position(|n| n == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn uniform_1f(&mut self, location: UniformLocation, value: f32) {
        self.set_uniform_value("uniform_1f", location, UniformValue::Float(value));
    }

    fn uniform_1i(&mut self, location: UniformLocation, value: i32) {
        self.set_uniform_value("uniform_1i", location, UniformValue::Int(value));
    }

    fn uniform_1ui(&mut self, location: UniformLocation, value: u32) {
        self.set_uniform_value("uniform_1ui", location, UniformValue::UInt(value));
    }

    fn uniform_3fv(&mut self, location: UniformLocation, value: [f32; 3]) {
        self.set_uniform_value("uniform_3fv", location, UniformValue::Vec3(value.into()));
    }

    fn uniform_3iv(&mut self, location: UniformLocation, value: [i32; 3]) {
        self.set_uniform_value("uniform_3iv", location, UniformValue::IVec3(value.into()));
    }

    fn uniform_4fv(&mut self, location: UniformLocation, value: [f32; 4]) {
        self.set_uniform_value("uniform_4fv", location, UniformValue::Vec4(value.into()));
    }

    fn uniform_4iv(&mut self, location: UniformLocation, value: [i32; 4]) {
        self.set_uniform_value("uniform_4iv", location, UniformValue::IVec4(value.into()));
    }

    fn uniform_matrix_3fv(&mut self, location: UniformLocation, value: [f32; 9]) {
        self.set_uniform_value(
            "uniform_matrix_3fv",
            location,
            UniformValue::Mat3(glam::Mat3::from_cols_array(&value)),
        );
    }

    fn uniform_matrix_4fv(&mut self, location: UniformLocation, value: [f32; 16]) {
        self.set_uniform_value(
            "uniform_matrix_4fv",
            location,
            UniformValue::Mat4(glam::Mat4::from_cols_array(&value)),
        );
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
        self.commands.push(HeadlessCommand::Viewport {
            x,
            y,
            width,
            height,
        });
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.next_handle());
        self.framebuffers.insert(id, Framebuffer::default());
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bound_framebuffer = framebuffer;
        self.commands.push(HeadlessCommand::BindFramebuffer(framebuffer));
    }

    fn framebuffer_texture_layer(
        &mut self,
        attachment: u32,
        texture: Option<TextureId>,
        _level: u32,
        layer: u32,
    ) {
        self.commands.push(HeadlessCommand::AttachLayer {
            attachment,
            texture,
            layer,
        });
        let Some(fb) = self
            .bound_framebuffer
            .and_then(|id| self.framebuffers.get_mut(&id))
        else {
            return;
        };
        match texture {
            Some(t) => {
                fb.attachments.insert(attachment, (t, layer));
            }
            None => {
                fb.attachments.remove(&attachment);
            }
        }
    }

    fn draw_buffers(&mut self, attachments: &[u32]) {
        if let Some(fb) = self
            .bound_framebuffer
            .and_then(|id| self.framebuffers.get_mut(&id))
        {
            fb.draw_buffers = attachments.to_vec();
        }
        self.commands
            .push(HeadlessCommand::DrawBuffers(attachments.to_vec()));
    }

    fn check_framebuffer_status(&self) -> FramebufferStatus {
        let Some(fb) = self
            .bound_framebuffer
            .and_then(|id| self.framebuffers.get(&id))
        else {
            return FramebufferStatus::Complete;
        };
        if fb.attachments.is_empty() {
            return FramebufferStatus::MissingAttachment;
        }
        let mut extent = None;
        for (texture, layer) in fb.attachments.values() {
            let Some(t) = self.textures.get(texture) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            let Some(format) = t.format else {
                return FramebufferStatus::IncompleteAttachment;
            };
            if !format.is_color_renderable(self.float_color_buffers) {
                return FramebufferStatus::Unsupported;
            }
            if *layer >= t.size.z {
                return FramebufferStatus::IncompleteAttachment;
            }
            match extent {
                None => extent = Some((t.size.x, t.size.y)),
                Some(e) if e != (t.size.x, t.size.y) => {
                    return FramebufferStatus::IncompleteDimensions;
                }
                Some(_) => {}
            }
        }
        FramebufferStatus::Complete
    }

    /// Any draw covers the whole viewport, the way the generator's quad does.
    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32) {
        self.commands.push(HeadlessCommand::Draw {
            primitive,
            first,
            count,
        });
        if count < 3 {
            return;
        }
        let Some(program) = self
            .current_program
            .and_then(|id| self.programs.get(&id))
            .filter(|p| p.linked)
        else {
            return;
        };
        let Some(fb) = self
            .bound_framebuffer
            .and_then(|id| self.framebuffers.get(&id))
        else {
            return;
        };
        let status = self.check_framebuffer_status();
        if status != FramebufferStatus::Complete {
            debug!("Draw into incomplete framebuffer ({}) writes nothing.", status);
            return;
        }
        let Some(kernel) = self.kernel.as_ref() else {
            return;
        };

        let slice = program
            .values
            .get("slice")
            .and_then(UniformValue::as_f32)
            .unwrap_or(0.0);
        let (vx, vy, vw, vh) = self.viewport;
        let mut writes = Vec::new();
        for (slot, attachment) in fb.draw_buffers.iter().enumerate() {
            let Some((texture_id, layer)) = fb.attachments.get(attachment) else {
                continue;
            };
            let Some(texture) = self.textures.get(texture_id) else {
                continue;
            };
            for y in 0..vh {
                for x in 0..vw {
                    let (px, py) = (vx + x as i32, vy + y as i32);
                    let outside = px < 0 || py < 0;
                    if outside || px as u32 >= texture.size.x || py as u32 >= texture.size.y {
                        continue;
                    }
                    let input = FragmentInput {
                        coordinate: Vec3::new(
                            (x as f32 + 0.5) / vw as f32,
                            (y as f32 + 0.5) / vh as f32,
                            slice,
                        ),
                        pixel: (px as u32, py as u32),
                        attachment: slot,
                        uniforms: &program.values,
                        textures: &self.textures,
                        units: &self.units,
                    };
                    let value = kernel(&input);
                    let index = texel_index(texture.size, px as u32, py as u32, *layer);
                    writes.push((*texture_id, index, value));
                }
            }
        }

        for (texture_id, index, value) in writes {
            if let Some(texture) = self.textures.get_mut(&texture_id) {
                texture.texels[index] = quantize(texture.format, value);
            }
        }
    }

    fn read_buffer(&mut self, attachment: u32) {
        if let Some(fb) = self
            .bound_framebuffer
            .and_then(|id| self.framebuffers.get_mut(&id))
        {
            fb.read_buffer = attachment;
        }
        self.commands.push(HeadlessCommand::ReadBuffer(attachment));
    }

    fn implementation_color_read_format(&self) -> (PixelFormat, PixelType) {
        let format = self.read_attachment().and_then(|(t, _)| t.format);
        match (self.readback, format) {
            (ReadbackSupport::Native, Some(TextureFormat::R8)) => {
                (PixelFormat::Red, PixelType::UnsignedByte)
            }
            (ReadbackSupport::Native, Some(TextureFormat::R16I)) => {
                (PixelFormat::RedInteger, PixelType::Short)
            }
            (ReadbackSupport::Native, Some(TextureFormat::R32I)) => {
                (PixelFormat::RedInteger, PixelType::Int)
            }
            (ReadbackSupport::Native, Some(TextureFormat::R32F)) => {
                (PixelFormat::Red, PixelType::Float)
            }
            (_, Some(f)) if f.is_integer() => (PixelFormat::RgbaInteger, PixelType::Int),
            (_, Some(TextureFormat::R32F | TextureFormat::Rgb32F)) => {
                (PixelFormat::Rgba, PixelType::Float)
            }
            _ => (PixelFormat::Rgba, PixelType::UnsignedByte),
        }
    }

    fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: PixelFormat,
        ty: PixelType,
        dst: &mut [u8],
    ) {
        self.commands
            .push(HeadlessCommand::ReadPixels { format, ty });
        let Some((texture, layer)) = self.read_attachment() else {
            debug!("readPixels with no read attachment.");
            return;
        };
        let normalized = is_normalized(texture.format);
        let components = format.components();
        let size = ty.bytes();
        let mut offset = 0;
        for row in 0..height {
            for col in 0..width {
                let (px, py) = (x + col as i32, y + row as i32);
                let texel = if px < 0
                    || py < 0
                    || px as u32 >= texture.size.x
                    || py as u32 >= texture.size.y
                {
                    [0.0; 4]
                } else {
                    texture.texels[texel_index(texture.size, px as u32, py as u32, layer)]
                };
                for value in texel.iter().take(components) {
                    let Some(out) = dst.get_mut(offset..offset + size) else {
                        debug!("readPixels destination too small.");
                        return;
                    };
                    encode_component(*value, ty, normalized, out);
                    offset += size;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> HeadlessContext {
        HeadlessContext::new(&Capabilities::default())
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn texel_count_does_not_wrap_in_u32() {
        let size = UVec3::new(65_536, 65_536, 2);
        assert_eq!(texel_count(size), 1 << 33);
        assert_eq!(texel_count(UVec3::new(3, 4, 5)), 60);
    }

    fn storage(ctx: &mut HeadlessContext, format: TextureFormat, size: UVec3) -> TextureId {
        let id = ctx.create_texture();
        ctx.active_texture(0);
        ctx.bind_texture_3d(Some(id));
        ctx.tex_storage_3d(format, size);
        id
    }

    #[test]
    fn upload_normalizes_unsigned_bytes() {
        let mut ctx = context();
        let id = storage(&mut ctx, TextureFormat::R8, UVec3::new(2, 1, 1));
        ctx.tex_sub_image_3d(
            UVec3::new(2, 1, 1),
            PixelFormat::Red,
            PixelType::UnsignedByte,
            &[0, 255],
        );
        let texels = ctx.texture_texels(id).unwrap();
        assert_eq!(texels[0][0], 0.0);
        assert_eq!(texels[1][0], 1.0);
    }

    #[test]
    fn compile_reports_unbalanced_source() {
        let mut ctx = context();
        let shader = ctx.create_shader(ShaderStage::Fragment, "void main() {\n");
        let log = ctx.compile_shader(shader).unwrap_err();
        assert!(log.contains("unexpected end of file"), "{log}");
    }

    #[test]
    fn link_resolves_declared_uniforms() {
        let mut ctx = context();
        let vs = ctx.create_shader(ShaderStage::Vertex, "uniform float slice;\nvoid main() {}");
        let fs = ctx.create_shader(
            ShaderStage::Fragment,
            "uniform highp sampler3D textureUnit0;\nuniform vec4 rgba0[2];\nvoid main() {}",
        );
        ctx.compile_shader(vs).unwrap();
        ctx.compile_shader(fs).unwrap();
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.delete_shader(vs);
        ctx.delete_shader(fs);
        ctx.link_program(program).unwrap();

        assert!(ctx.uniform_location(program, "slice").is_some());
        assert!(ctx.uniform_location(program, "textureUnit0").is_some());
        assert!(ctx.uniform_location(program, "rgba0").is_some());
        assert!(ctx.uniform_location(program, "visible0").is_none());
    }

    #[test]
    fn incomplete_without_attachments() {
        let mut ctx = context();
        let fb = ctx.create_framebuffer();
        ctx.bind_framebuffer(Some(fb));
        assert_eq!(
            ctx.check_framebuffer_status(),
            FramebufferStatus::MissingAttachment
        );
    }

    #[test]
    fn float_targets_are_unsupported_in_integer_mode() {
        let mut ctx = HeadlessContext::new(&Capabilities::new(true, 16));
        let id = storage(&mut ctx, TextureFormat::R32F, UVec3::new(2, 2, 2));
        let fb = ctx.create_framebuffer();
        ctx.bind_framebuffer(Some(fb));
        ctx.framebuffer_texture_layer(0, Some(id), 0, 1);
        assert_eq!(
            ctx.check_framebuffer_status(),
            FramebufferStatus::Unsupported
        );
    }

    #[test]
    fn rgba_only_contexts_report_four_component_formats() {
        let mut ctx = context().with_readback_support(ReadbackSupport::RgbaOnly);
        let id = storage(&mut ctx, TextureFormat::R16I, UVec3::new(1, 1, 1));
        let fb = ctx.create_framebuffer();
        ctx.bind_framebuffer(Some(fb));
        ctx.framebuffer_texture_layer(0, Some(id), 0, 0);
        ctx.read_buffer(0);
        assert_eq!(
            ctx.implementation_color_read_format(),
            (PixelFormat::RgbaInteger, PixelType::Int)
        );
    }

    #[test]
    fn nearest_sampling_clamps_to_edge() {
        assert_eq!(nearest(-0.5, 4), 0);
        assert_eq!(nearest(0.3, 4), 1);
        assert_eq!(nearest(1.0, 4), 3);
    }
}
