use field_synth::field::{FunctionFamily, ShaderComposer};
use field_synth::prelude::*;
use glam::{Mat4, UVec3};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

fn image(ordinal: Ordinal) -> ImageField {
    ImageField::new(
        ordinal,
        NumericMode::Float,
        UVec3::ONE,
        Mat4::IDENTITY,
        vec![0],
    )
    .unwrap()
}

/// `count` distinct ordinals picked at random from a fresh allocator's sixteen.
fn distinct_ordinals(rng: &mut StdRng, count: usize) -> Vec<Ordinal> {
    let mut allocator = OrdinalAllocator::new(16);
    let mut pool: Vec<Ordinal> = (0..16).map(|_| allocator.allocate().unwrap()).collect();
    (0..count)
        .map(|_| pool.swap_remove(rng.random_range(0..pool.len())))
        .collect()
}

#[test]
fn three_fields_give_three_names_per_family() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..32 {
        let ordinals = distinct_ordinals(&mut rng, 3);
        let mut composer = ShaderComposer::new();
        for &ordinal in &ordinals {
            composer.push(image(ordinal).shader_fragment());
        }
        let source = composer.compose().unwrap();

        for family in FunctionFamily::ALL {
            let mut names: Vec<String> = ordinals
                .iter()
                .map(|&ordinal| family.symbol(ordinal))
                .collect();
            for name in &names {
                assert_eq!(
                    source.matches(&format!("{}(const in", name)).count(),
                    1,
                    "{name} should be defined exactly once"
                );
            }
            names.sort();
            names.dedup();
            assert_eq!(names.len(), 3);
        }
        for ordinal in &ordinals {
            assert!(source.contains(&format!("uniform vec4 {};", ordinal.suffix("rgba"))));
        }
    }
}

#[test]
fn reused_ordinals_collide() {
    let mut allocator = OrdinalAllocator::new(8);
    let shared = allocator.allocate().unwrap();
    let mut composer = ShaderComposer::new();
    composer
        .push(image(shared).shader_fragment())
        .push(SegmentationField::new(shared, Dataset::default()).shader_fragment());
    let err = composer.compose().unwrap_err();
    assert!(matches!(err, Error::Composition(_)));
}

#[test]
fn allocator_ordinals_never_collide() {
    let mut allocator = OrdinalAllocator::new(16);
    let mut composer = ShaderComposer::new();
    let mut previous = None;
    for _ in 0..16 {
        let ordinal = allocator.allocate().unwrap();
        if let Some(p) = previous {
            assert!(ordinal > p);
        }
        previous = Some(ordinal);
        composer.push(image(ordinal).shader_fragment());
    }
    assert!(composer.compose().is_ok());
    assert!(allocator.allocate().is_err());
}
