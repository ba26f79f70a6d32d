use anyhow::Context;
use field_synth::prelude::*;
use field_synth_examples::{init_tracing, write_overlay_png, Window};
use glam::{UVec3, Vec3};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::info;

const SIZE: UVec3 = UVec3::new(96, 96, 24);

fn main() -> anyhow::Result<()> {
    init_tracing();
    let capabilities = Capabilities::default();
    let mut allocator = OrdinalAllocator::from_capabilities(&capabilities);
    let mut ctx = HeadlessContext::new(&capabilities);
    let mut sink = VecSink::at_least(Severity::Warning);

    let ct = phantom_ct(&mut StdRng::seed_from_u64(7));
    let ct_fields =
        fields_from_dataset_with_diagnostics(&ct, &mut allocator, NumericMode::Integer, &mut sink)?;
    let seg = phantom_segmentation();
    let seg_fields = fields_from_dataset_with_diagnostics(
        &seg,
        &mut allocator,
        NumericMode::Integer,
        &mut sink,
    )?;
    info!(
        "{} image field(s), {} segment field(s)",
        ct_fields.len(),
        seg_fields.len()
    );

    for field in ct_fields.iter().chain(&seg_fields) {
        let mut field = field.borrow_mut();
        if !field.field_to_texture_with_diagnostics(&mut ctx, &mut sink) {
            anyhow::bail!("upload of field {} failed", field.ordinal());
        }
    }

    let background: Vec<f32> = ct_fields
        .first()
        .and_then(|f| {
            let f = f.borrow();
            let texture = f.core().texture()?;
            ctx.texture_texels(texture)
                .map(|texels| texels.iter().map(|t| t[0]).collect())
        })
        .context("CT texture missing")?;

    let masks: Vec<(Vec<u8>, glam::Vec4)> = seg_fields
        .iter()
        .filter_map(|f| {
            let f = f.borrow();
            let texture = f.core().texture()?;
            let mask = ctx
                .texture_texels(texture)?
                .iter()
                .map(|t| (t[0] * 255.0).round() as u8)
                .collect();
            Some((mask, f.core().rgba()))
        })
        .collect();
    let masks: Vec<(&[u8], glam::Vec4)> = masks.iter().map(|(m, c)| (m.as_slice(), *c)).collect();

    info!(
        "{} warning(s) while loading, {} malformed dataset report(s)",
        sink.len(),
        sink.count(DiagnosticKind::MalformedDataset)
    );

    let window = Window::new(40.0, 400.0);
    for slice in [SIZE.z / 4, SIZE.z / 2, 3 * SIZE.z / 4] {
        let out = format!("segmentation-split-overlay-{slice:02}.png");
        write_overlay_png(&background, &masks, SIZE, slice, window, out)?;
    }
    Ok(())
}

fn phantom_ct(rng: &mut StdRng) -> Dataset {
    let mut ds = Dataset::new(SopClass::CtImage, SIZE.x, SIZE.y, SIZE.z);
    ds.pixel_measures = Some(PixelMeasures {
        pixel_spacing: [2.0, 2.0],
        slice_thickness: 4.0,
        spacing_between_slices: 4.0,
    });
    ds.window_center = Some(40.0);
    ds.window_width = Some(400.0);
    let center = SIZE.as_vec3() * 0.5;
    let mut bytes = Vec::with_capacity(2 * SIZE.as_u64vec3().element_product() as usize);
    for z in 0..SIZE.z {
        for y in 0..SIZE.y {
            for x in 0..SIZE.x {
                let voxel = Vec3::new(x as f32, y as f32, z as f32 * 4.0);
                let d = (voxel - center * Vec3::new(1.0, 1.0, 4.0)).length();
                let base = if d < 40.0 { 60 } else { -1000 };
                let value: i16 = base + rng.random_range(-20..=20);
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    ds.pixel_data = bytes;
    ds
}

fn phantom_segmentation() -> Dataset {
    let mut ds = Dataset::new(SopClass::Segmentation, SIZE.x, SIZE.y, 2 * SIZE.z);
    ds.bits_allocated = 1;
    ds.pixel_measures = Some(PixelMeasures {
        pixel_spacing: [2.0, 2.0],
        slice_thickness: 4.0,
        spacing_between_slices: 4.0,
    });
    ds.segments = vec![
        Segment::new(1, "organ", [45000, 40000, 28000]),
        Segment::new(2, "lesion", [30000, 52000, 40000]),
    ];
    ds.per_frame_groups = (0..2 * SIZE.z)
        .map(|f| FrameGroup::for_segment(1 + f / SIZE.z))
        .collect();

    let frame_bytes = ds.packed_frame_bytes();
    let mut packed = vec![0u8; frame_bytes * 2 * SIZE.z as usize];
    let disks = [(Vec3::new(48.0, 48.0, 0.0), 30.0), (Vec3::new(58.0, 40.0, 0.0), 9.0)];
    for (segment, (center, radius)) in disks.iter().enumerate() {
        for z in 0..SIZE.z {
            let frame = segment * SIZE.z as usize + z as usize;
            for y in 0..SIZE.y {
                for x in 0..SIZE.x {
                    let p = Vec3::new(x as f32, y as f32, 0.0);
                    if p.distance(*center) < *radius {
                        let bit = (y * SIZE.x + x) as usize;
                        packed[frame * frame_bytes + bit / 8] |= 1 << (bit % 8);
                    }
                }
            }
        }
    }
    ds.pixel_data = packed;
    ds
}
