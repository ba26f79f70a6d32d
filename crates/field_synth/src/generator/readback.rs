//! Copying rendered slices back to CPU buffers.
//!
//! The compact single-component read is used when the context reports it as its native
//! read format for the attachment. Otherwise the slice is read as four components into a
//! scratch buffer and component 0 is copied out. Both paths write the same bytes.
use std::collections::HashMap;

use tracing::debug;

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::generator::GeneratorFormats;
use crate::gpu::{GpuContext, PixelType};

/// Per-`generate` readback state. Scratch buffers are allocated once per attachment and
/// reused for every slice.
pub struct SliceReadback {
    formats: GeneratorFormats,
    scratch: HashMap<usize, Vec<u8>>,
    native_reads: u32,
    fallback_reads: u32,
}

impl SliceReadback {
    pub fn new(formats: GeneratorFormats) -> Self {
        Self {
            formats,
            scratch: HashMap::new(),
            native_reads: 0,
            fallback_reads: 0,
        }
    }

    pub fn native_reads(&self) -> u32 {
        self.native_reads
    }

    pub fn fallback_reads(&self) -> u32 {
        self.fallback_reads
    }

    /// Byte range of slice `slice` within a readback buffer.
    pub fn slice_range(&self, slice: u32, width: u32, height: u32) -> std::ops::Range<usize> {
        let len = width as usize * height as usize * self.formats.bytes_per_element;
        let start = slice as usize * len;
        start..start + len
    }

    /// Reads color attachment `attachment` of the bound framebuffer into `dst`, which must
    /// hold exactly one slice of `width * height` elements.
    pub fn read_slice(
        &mut self,
        ctx: &mut dyn GpuContext,
        attachment: usize,
        width: u32,
        height: u32,
        dst: &mut [u8],
        sink: &mut dyn DiagnosticSink,
    ) {
        let pixels = width as usize * height as usize;
        if dst.len() != pixels * self.formats.bytes_per_element {
            debug!(
                "Readback destination holds {} bytes, expected {}; skipping.",
                dst.len(),
                pixels * self.formats.bytes_per_element
            );
            return;
        }

        ctx.read_buffer(attachment as u32);
        let (format, ty) = self.formats.read_format;
        if ctx.implementation_color_read_format() == (format, ty) {
            ctx.read_pixels(0, 0, width, height, format, ty, dst);
            self.native_reads += 1;
            return;
        }

        let formats = self.formats;
        let scratch = self.scratch.entry(attachment).or_insert_with(|| {
            report(sink, Diagnostic::FallbackReadback { attachment });
            vec![0; pixels * formats.fallback_bytes_per_pixel()]
        });
        scratch.resize(pixels * formats.fallback_bytes_per_pixel(), 0);
        let (fallback_format, fallback_type) = formats.fallback_format;
        ctx.read_pixels(0, 0, width, height, fallback_format, fallback_type, scratch);
        copy_first_component(scratch, &formats, dst);
        self.fallback_reads += 1;
    }
}

/// Copies component 0 of every four-component pixel in `scratch` to `dst`, converting to
/// the destination element type.
fn copy_first_component(scratch: &[u8], formats: &GeneratorFormats, dst: &mut [u8]) {
    let stride = formats.fallback_bytes_per_pixel();
    let element = formats.bytes_per_element;
    for (pixel, out) in scratch.chunks_exact(stride).zip(dst.chunks_exact_mut(element)) {
        let c = [pixel[0], pixel[1], pixel[2], pixel[3]];
        if formats.fallback_format.1 == PixelType::Int && element == 2 {
            out.copy_from_slice(&(i32::from_ne_bytes(c) as i16).to_ne_bytes());
        } else {
            out.copy_from_slice(&c[..element]);
        }
    }
}
