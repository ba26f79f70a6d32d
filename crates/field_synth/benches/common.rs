use std::time::Duration;

use criterion::{Criterion, Throughput};
use glam::UVec3;

/// Short runs: the headless context is a CPU loop, so variance is low.
pub fn default_criterion() -> Criterion {
    Criterion::default()
        .configure_from_args()
        .sample_size(20)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(2))
}

/// Throughput in voxels of a whole volume.
pub fn volume_throughput(dimensions: UVec3) -> Throughput {
    let voxels = dimensions.as_u64vec3().element_product();
    Throughput::Elements(voxels.max(1))
}

/// Throughput in bytes of a 1-bit packed volume, rows padded to whole bytes.
#[allow(dead_code)]
pub fn packed_throughput(dimensions: UVec3) -> Throughput {
    let bytes =
        u64::from(dimensions.x.div_ceil(8)) * u64::from(dimensions.y) * u64::from(dimensions.z);
    Throughput::Bytes(bytes.max(1))
}
