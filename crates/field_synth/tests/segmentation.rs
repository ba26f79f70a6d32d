use field_synth::dataset::split_segments_with_diagnostics;
use field_synth::diagnostics::{DiagnosticKind, VecSink};
use field_synth::gpu::TextureFormat;
use field_synth::prelude::*;

fn dataset(order: &[u32], columns: u32, rows: u32) -> Dataset {
    let mut ds = Dataset::new(SopClass::Segmentation, columns, rows, order.len() as u32);
    ds.bits_allocated = 1;
    ds.segments = vec![
        Segment::new(1, "kidney", [45000, 40000, 28000]),
        Segment::new(2, "cyst", [60000, 30000, 40000]),
    ];
    ds.per_frame_groups = order.iter().map(|&n| FrameGroup::for_segment(n)).collect();
    let bytes = ds.packed_frame_bytes() * order.len();
    ds.pixel_data = (0..bytes).map(|b| (b * 37 % 251) as u8).collect();
    ds
}

#[test]
fn alternating_columns_unpack_to_full_and_empty_voxels() {
    // Bit 0 is column 0; every row reads 1, 0, 1, 0.
    let voxels = unpack_bits(&[0b0101, 0b0101, 0b0101, 0b0101], 4, 4, 1);
    assert_eq!(voxels.len(), 16);
    for row in voxels.chunks_exact(4) {
        assert_eq!(row, [255, 0, 255, 0]);
    }
}

#[test]
fn split_ranges_cover_the_payload_without_overlap() {
    let ds = dataset(&[1, 2, 1], 8, 3);
    let mut sink = VecSink::new();
    let parts = split_segments_with_diagnostics(&ds, &mut sink);

    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].number_of_frames, 2);
    assert_eq!(parts[1].number_of_frames, 1);

    let frame_bytes = ds.packed_frame_bytes();
    assert_eq!(parts[0].pixel_data.len(), 2 * frame_bytes);
    assert_eq!(parts[1].pixel_data.len(), frame_bytes);
    let joined: Vec<u8> = parts
        .iter()
        .flat_map(|p| p.pixel_data.iter().copied())
        .collect();
    assert_eq!(joined, ds.pixel_data);
    assert_eq!(sink.count(DiagnosticKind::MalformedDataset), 1);
}

#[test]
fn factory_builds_one_uploadable_field_per_segment() {
    let ds = dataset(&[1, 1, 2], 8, 2);
    let capabilities = Capabilities::default();
    let mut allocator = OrdinalAllocator::from_capabilities(&capabilities);
    let mut ctx = HeadlessContext::new(&capabilities);

    let fields = fields_from_dataset(&ds, &mut allocator, NumericMode::Float).unwrap();
    assert_eq!(fields.len(), 2);
    for field in &fields {
        let mut field = field.borrow_mut();
        assert!(field.needs_update());
        assert!(field.field_to_texture(&mut ctx));
        assert!(!field.needs_update());
        let texture = field.core().texture().unwrap();
        assert_eq!(ctx.texture_format(texture), Some(TextureFormat::R8));
        assert_eq!(field.core().gradient_opacity_scale(), 1.0);
    }
    assert_eq!(fields[0].borrow().core().dimensions().z, 2);
    assert_eq!(fields[1].borrow().core().dimensions().z, 1);
    assert_ne!(
        fields[0].borrow().core().rgba(),
        fields[1].borrow().core().rgba()
    );
}

#[test]
fn unrecognized_datasets_produce_no_fields() {
    let ds = Dataset::new(SopClass::from_name("RTDoseStorage"), 4, 4, 1);
    let mut allocator = OrdinalAllocator::new(16);
    let mut sink = VecSink::new();
    let fields =
        fields_from_dataset_with_diagnostics(&ds, &mut allocator, NumericMode::Integer, &mut sink)
            .unwrap();
    assert!(fields.is_empty());
    let Some(Diagnostic::UnrecognizedDataset { sop_class }) = sink.as_slice().first() else {
        panic!("expected an unrecognized dataset diagnostic");
    };
    assert_eq!(sop_class, "RTDoseStorage");
}
