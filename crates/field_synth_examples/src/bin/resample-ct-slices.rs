use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;
use field_synth::prelude::*;
use field_synth_examples::{init_tracing, write_slice_png, Window};
use glam::{Mat4, UVec3, Vec3};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();
    let capabilities = Capabilities::default();
    let mut allocator = OrdinalAllocator::from_capabilities(&capabilities);

    // 2 mm input voxels resampled onto a 4 mm grid covering the same extent.
    let input_size = UVec3::new(128, 128, 32);
    let input_pixel_to_patient = Mat4::from_scale(Vec3::splat(2.0));
    let input = make_input(
        allocator.allocate()?,
        input_size,
        input_pixel_to_patient.inverse(),
        &mut StdRng::seed_from_u64(42),
    )?;
    let input_ordinal = input.ordinal();

    let output_size = input_size / 2;
    let output_pixel_to_patient = Mat4::from_scale(Vec3::splat(4.0));
    let output = Rc::new(RefCell::new(ImageField::generated(
        allocator.allocate()?,
        NumericMode::Float,
        output_size,
        output_pixel_to_patient.inverse(),
        true,
    )));
    let geometry = *output
        .borrow()
        .core()
        .geometry()
        .context("generated field has geometry")?;
    let program = ResampleProgram::onto(&geometry, vec![input_ordinal]);

    // The headless context runs this kernel in place of the fragment shader.
    let input_patient_to_texture = Mat4::from_scale(input_size.as_vec3().recip())
        * Mat4::from_translation(Vec3::splat(0.5))
        * input_pixel_to_patient.inverse();
    let output_to_input = input_patient_to_texture * program.output_texture_to_patient();
    let unit = input_ordinal.texture_unit();
    let mut ctx = HeadlessContext::new(&capabilities).with_fragment_kernel(move |fragment| {
        fragment.sample(unit, output_to_input.transform_point3(fragment.coordinate))
    });

    let mut generator = ProgrammaticGenerator::new(
        &mut ctx,
        GeneratorConfig::from_capabilities(&capabilities)?.with_label("resample"),
        program,
        vec![shared(input)],
        vec![output.clone() as SharedField],
    )?;
    anyhow::ensure!(generator.update_program(&mut ctx), "program did not link");
    let summary = generator.generate(&mut ctx);
    info!(
        "Generated {} slices ({} native reads, {} fallback reads)",
        summary.slices, summary.native_reads, summary.fallback_reads
    );

    let values = output
        .borrow()
        .generated_values()
        .context("output keeps no readback copy")?;
    let window = Window::new(40.0, 400.0);
    for slice in [0, output_size.z / 2, output_size.z - 1] {
        let out = format!("resample-ct-slices-{slice:02}.png");
        write_slice_png(&values, output_size, slice, window, out)?;
    }
    generator.release(&mut ctx);
    Ok(())
}

fn make_input(
    ordinal: Ordinal,
    size: UVec3,
    patient_to_pixel: Mat4,
    rng: &mut StdRng,
) -> anyhow::Result<ImageField> {
    let center = size.as_vec3() * 0.5;
    let mut values = Vec::with_capacity(size.as_u64vec3().element_product() as usize);
    for z in 0..size.z {
        for y in 0..size.y {
            for x in 0..size.x {
                let p = Vec3::new(x as f32, y as f32, z as f32 * 4.0);
                let d = p.distance(center * Vec3::new(1.0, 1.0, 4.0));
                let shell = if (40.0..48.0).contains(&d) { 700 } else { 0 };
                let body = if d < 56.0 { 40 } else { -1000 };
                values.push(body + shell + rng.random_range(-15i16..=15));
            }
        }
    }
    Ok(ImageField::new(
        ordinal,
        NumericMode::Float,
        size,
        patient_to_pixel,
        values,
    )?)
}
