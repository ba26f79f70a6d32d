mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use field_synth::prelude::*;
use glam::UVec3;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

const EDGES: [u32; 4] = [64, 128, 256, 512];
const FRAMES: u32 = 32;
const SEGMENTS: u32 = 4;

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random::<u8>()).collect()
}

fn unpack_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation/unpack_bits");

    for &edge in &EDGES {
        let dimensions = UVec3::new(edge, edge, FRAMES);
        let packed_len = edge.div_ceil(8) as usize * edge as usize * FRAMES as usize;
        let packed = random_bytes(packed_len, 0x5E6 ^ edge as u64);
        group.throughput(common::volume_throughput(dimensions));

        group.bench_with_input(BenchmarkId::from_parameter(edge), &edge, |b, &edge| {
            b.iter(|| {
                let voxels = unpack_bits(black_box(&packed), edge, edge, FRAMES);
                black_box(voxels.len());
            });
        });
    }

    group.finish();
}

fn split_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation/split_segments");

    for &edge in &EDGES {
        let frames = FRAMES * SEGMENTS;
        let mut dataset = Dataset::new(SopClass::Segmentation, edge, edge, frames);
        dataset.bits_allocated = 1;
        dataset.segments = (1..=SEGMENTS)
            .map(|n| Segment::new(n, format!("segment {n}"), [50000, 32896, 32896]))
            .collect();
        dataset.per_frame_groups = (0..frames)
            .map(|f| FrameGroup::for_segment(1 + f / FRAMES))
            .collect();
        dataset.pixel_data = random_bytes(dataset.packed_frame_bytes() * frames as usize, 0xC0DE);
        group.throughput(common::packed_throughput(UVec3::new(edge, edge, frames)));

        group.bench_with_input(BenchmarkId::from_parameter(edge), &dataset, |b, dataset| {
            b.iter(|| {
                let parts = split_segments(black_box(dataset));
                black_box(parts.len());
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = unpack_benches, split_benches
}
criterion_main!(benches);
