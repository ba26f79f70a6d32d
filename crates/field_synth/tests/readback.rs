use std::cell::RefCell;
use std::rc::Rc;

use field_synth::diagnostics::VecSink;
use field_synth::gpu::{FragmentInput, ReadbackSupport};
use field_synth::prelude::*;
use glam::{Mat4, UVec3};

const SIZE: UVec3 = UVec3::new(5, 3, 4);

/// Writes one output per attachment from pixel, slice and attachment, with negative and
/// fractional values so both conversions are exercised.
struct Ramp;

impl FragmentProgram for Ramp {
    fn main_body(&self, layout: &ProgramLayout) -> String {
        (0..layout.outputs)
            .map(|k| {
                let expression = format!("gl_FragCoord.x * 100.5 - 300. + float({})", k * 7);
                format!("  {}\n", layout.store(k, &expression))
            })
            .collect()
    }
}

fn ramp(input: &FragmentInput<'_>) -> [f32; 4] {
    let (x, y) = input.pixel;
    let value = x as f32 * 100.5 - 300.0 + input.attachment as f32 * 7.0
        - y as f32 * 0.25
        + input.coordinate.z * 1000.0;
    [value, -1.0, 2.0, 3.0]
}

struct Run {
    bytes: Vec<Vec<u8>>,
    summary: GenerateSummary,
    fallback_attachments: Vec<usize>,
}

fn run(mode: NumericMode, support: ReadbackSupport) -> Run {
    let capabilities = Capabilities::new(mode == NumericMode::Integer, 16);
    let mut ctx = HeadlessContext::new(&capabilities)
        .with_readback_support(support)
        .with_fragment_kernel(ramp);
    let mut allocator = OrdinalAllocator::from_capabilities(&capabilities);

    let outputs: Vec<Rc<RefCell<ImageField>>> = (0..2)
        .map(|_| {
            let ordinal = allocator.allocate().unwrap();
            Rc::new(RefCell::new(ImageField::generated(
                ordinal,
                mode,
                SIZE,
                Mat4::IDENTITY,
                true,
            )))
        })
        .collect();
    let shared_outputs: Vec<SharedField> = outputs
        .iter()
        .map(|o| o.clone() as SharedField)
        .collect();

    let mut generator = ProgrammaticGenerator::new(
        &mut ctx,
        GeneratorConfig::new(mode).with_label("ramp"),
        Ramp,
        Vec::new(),
        shared_outputs,
    )
    .unwrap();
    assert!(generator.update_program(&mut ctx));

    let mut sink = VecSink::new();
    let summary = generator.generate_with_diagnostics(&mut ctx, &mut sink);
    let bytes = outputs
        .iter()
        .map(|o| o.borrow().generated_pixel_data().unwrap().to_vec())
        .collect();
    Run {
        bytes,
        summary,
        fallback_attachments: sink.fallback_attachments(),
    }
}

fn assert_equivalent(mode: NumericMode) {
    let native = run(mode, ReadbackSupport::Native);
    let fallback = run(mode, ReadbackSupport::RgbaOnly);

    assert_eq!(native.summary.native_reads, 2 * SIZE.z);
    assert_eq!(native.summary.fallback_reads, 0);
    assert_eq!(fallback.summary.native_reads, 0);
    assert_eq!(fallback.summary.fallback_reads, 2 * SIZE.z);

    // Scratch buffers are allocated once per attachment.
    assert!(native.fallback_attachments.is_empty());
    assert_eq!(fallback.fallback_attachments, vec![0, 1]);

    assert_eq!(native.bytes, fallback.bytes);
    assert!(native.bytes[0].iter().any(|&b| b != 0));
}

#[test]
fn integer_fallback_matches_native_bytes() {
    assert_equivalent(NumericMode::Integer);
}

#[test]
fn float_fallback_matches_native_bytes() {
    assert_equivalent(NumericMode::Float);
}

#[test]
fn integer_readback_truncates_like_the_texture() {
    let run = run(NumericMode::Integer, ReadbackSupport::RgbaOnly);
    let first = i16::from_ne_bytes([run.bytes[0][0], run.bytes[0][1]]);
    // Pixel (0, 0) of slice 0: -300 + 0.125 * 1000.
    assert_eq!(first, -175);
    let second_output = i16::from_ne_bytes([run.bytes[1][0], run.bytes[1][1]]);
    assert_eq!(second_output, -168);
}
