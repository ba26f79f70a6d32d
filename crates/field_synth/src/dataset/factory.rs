//! Building fields from decoded datasets.
use tracing::debug;

use crate::dataset::split::split_segments_with_diagnostics;
use crate::dataset::{Dataset, SopClass};
use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::error::Result;
use crate::field::{
    shared, ImageField, OrdinalAllocator, SegmentationField, SharedField, TransformField,
};
use crate::generator::NumericMode;

/// Builds the fields a dataset describes. See [`fields_from_dataset_with_diagnostics`].
pub fn fields_from_dataset(
    dataset: &Dataset,
    allocator: &mut OrdinalAllocator,
    mode: NumericMode,
) -> Result<Vec<SharedField>> {
    fields_from_dataset_with_diagnostics(dataset, allocator, mode, &mut ())
}

/// Builds the fields a dataset describes, dispatching on its SOP class:
///
/// - image classes give one [`ImageField`]
/// - segmentations give one [`SegmentationField`] per segment
/// - deformable registrations give one [`TransformField`]
///
/// Any other class is reported and gives no fields. Running out of ordinals is an error;
/// fields built before that point are dropped.
pub fn fields_from_dataset_with_diagnostics(
    dataset: &Dataset,
    allocator: &mut OrdinalAllocator,
    mode: NumericMode,
    sink: &mut dyn DiagnosticSink,
) -> Result<Vec<SharedField>> {
    let fields: Vec<SharedField> = if dataset.sop_class.is_image() {
        let ordinal = allocator.allocate()?;
        vec![shared(ImageField::from_dataset_with_diagnostics(
            ordinal, mode, dataset, sink,
        ))]
    } else {
        match &dataset.sop_class {
            SopClass::Segmentation => {
                let mut fields = Vec::new();
                for segment in split_segments_with_diagnostics(dataset, sink) {
                    let ordinal = allocator.allocate()?;
                    fields.push(shared(SegmentationField::new_with_diagnostics(
                        ordinal, segment, sink,
                    )));
                }
                fields
            }
            SopClass::DeformableSpatialRegistration => {
                let ordinal = allocator.allocate()?;
                vec![shared(TransformField::from_dataset_with_diagnostics(
                    ordinal, mode, dataset, sink,
                ))]
            }
            other => {
                report(
                    sink,
                    Diagnostic::UnrecognizedDataset {
                        sop_class: other.name().to_string(),
                    },
                );
                Vec::new()
            }
        }
    };
    debug!(
        "Built {} fields from a {} dataset.",
        fields.len(),
        dataset.sop_class
    );
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FrameGroup, Segment};
    use crate::diagnostics::{DiagnosticKind, VecSink};
    use crate::error::Error;
    use crate::field::Ordinal;

    fn segmentation() -> Dataset {
        let mut ds = Dataset::new(SopClass::Segmentation, 8, 1, 2);
        ds.bits_allocated = 1;
        ds.pixel_data = vec![0xFF, 0x0F];
        ds.segments = vec![
            Segment::new(1, "liver", [50000, 40000, 30000]),
            Segment::new(2, "lesion", [30000, 20000, 45000]),
        ];
        ds.per_frame_groups = vec![FrameGroup::for_segment(1), FrameGroup::for_segment(2)];
        ds
    }

    #[test]
    fn image_datasets_give_one_field() {
        let mut ds = Dataset::new(SopClass::CtImage, 2, 2, 1);
        ds.pixel_data = vec![0; 8];
        let mut allocator = OrdinalAllocator::new(4);
        let fields = fields_from_dataset(&ds, &mut allocator, NumericMode::Float).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].borrow().ordinal(), Ordinal(0));
    }

    #[test]
    fn segmentations_give_one_field_per_segment() {
        let mut allocator = OrdinalAllocator::new(4);
        let fields =
            fields_from_dataset(&segmentation(), &mut allocator, NumericMode::Float).unwrap();
        let ordinals: Vec<_> = fields.iter().map(|f| f.borrow().ordinal()).collect();
        assert_eq!(ordinals, vec![Ordinal(0), Ordinal(1)]);
        assert_eq!(allocator.remaining(), 2);
    }

    #[test]
    fn unknown_classes_give_no_fields() {
        let ds = Dataset::new(SopClass::from_name("RTStructureSet"), 1, 1, 1);
        let mut allocator = OrdinalAllocator::new(4);
        let mut sink = VecSink::new();
        let fields =
            fields_from_dataset_with_diagnostics(&ds, &mut allocator, NumericMode::Float, &mut sink)
                .unwrap();
        assert!(fields.is_empty());
        assert_eq!(sink.count(DiagnosticKind::UnrecognizedDataset), 1);
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn exhausted_ordinals_are_an_error() {
        let mut allocator = OrdinalAllocator::new(1);
        let result = fields_from_dataset(&segmentation(), &mut allocator, NumericMode::Float);
        assert!(matches!(result, Err(Error::OrdinalsExhausted { capacity: 1 })));
    }
}
