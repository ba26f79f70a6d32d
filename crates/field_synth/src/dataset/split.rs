//! Splitting a multi-segment segmentation dataset into single-segment datasets.
use std::collections::BTreeMap;

use crate::dataset::{Dataset, FrameGroup, Segment};
use crate::diagnostics::{report, Diagnostic, DiagnosticSink};

/// Splits `dataset` into one dataset per segment. See
/// [`split_segments_with_diagnostics`].
pub fn split_segments(dataset: &Dataset) -> Vec<Dataset> {
    split_segments_with_diagnostics(dataset, &mut ())
}

/// Splits `dataset` into one dataset per segment.
///
/// Frames are partitioned by their referenced segment number. Each frame occupies
/// `ceil(rows * columns / 8)` bytes, frames of one segment are assumed contiguous and
/// segments ordered by number, so segment `k` takes the byte range following the frames of
/// all lower-numbered segments. In every output the segment is renumbered to 1.
///
/// Mismatched frame counts, unsorted frames, short pixel data and segments without frames
/// are reported as warnings; segments without frames produce no dataset.
pub fn split_segments_with_diagnostics(
    dataset: &Dataset,
    sink: &mut dyn DiagnosticSink,
) -> Vec<Dataset> {
    if dataset.number_of_frames as usize != dataset.per_frame_groups.len() {
        warn(
            sink,
            format!(
                "number of frames ({}) does not match number of functional groups ({})",
                dataset.number_of_frames,
                dataset.per_frame_groups.len()
            ),
        );
    }

    let sorted = dataset
        .per_frame_groups
        .windows(2)
        .all(|w| w[0].referenced_segment_number <= w[1].referenced_segment_number);
    if !sorted {
        warn(
            sink,
            "frames are not grouped by segment; pixel ranges assume they are".to_string(),
        );
    }

    let mut groups: BTreeMap<u32, Vec<FrameGroup>> = BTreeMap::new();
    for group in &dataset.per_frame_groups {
        groups
            .entry(group.referenced_segment_number)
            .or_default()
            .push(FrameGroup {
                referenced_segment_number: 1,
                ..group.clone()
            });
    }

    let segments: Vec<Segment> = if dataset.segments.is_empty() {
        warn(sink, "dataset lists no segments".to_string());
        groups
            .keys()
            .map(|&n| Segment::new(n, format!("Segment {}", n), [65535, 32896, 32896]))
            .collect()
    } else {
        dataset.segments.clone()
    };

    let frame_bytes = dataset.packed_frame_bytes();
    let mut ranges: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    let mut offset = 0;
    for (&number, frames) in &groups {
        let size = frame_bytes * frames.len();
        ranges.insert(number, (offset, offset + size));
        offset += size;
    }
    if offset > dataset.pixel_data.len() {
        warn(
            sink,
            format!(
                "pixel data holds {} bytes but the frames need {}",
                dataset.pixel_data.len(),
                offset
            ),
        );
    }
    for number in groups.keys() {
        if !segments.iter().any(|s| s.number == *number) {
            warn(
                sink,
                format!("frames reference unknown segment {}", number),
            );
        }
    }

    let mut datasets = Vec::with_capacity(segments.len());
    for segment in &segments {
        let Some(frames) = groups.get(&segment.number) else {
            warn(
                sink,
                format!("segment {} has no frames", segment.number),
            );
            continue;
        };
        let (begin, end) = ranges
            .get(&segment.number)
            .copied()
            .unwrap_or((0, 0));
        let available = dataset.pixel_data.len();
        let mut pixel_data = dataset.pixel_data[begin.min(available)..end.min(available)].to_vec();
        pixel_data.resize(end - begin, 0);

        datasets.push(Dataset {
            number_of_frames: frames.len() as u32,
            pixel_data,
            segments: vec![Segment {
                number: 1,
                ..segment.clone()
            }],
            per_frame_groups: frames.clone(),
            ..dataset.clone()
        });
    }
    datasets
}

fn warn(sink: &mut dyn DiagnosticSink, message: String) {
    report(
        sink,
        Diagnostic::MalformedDataset {
            context: "Segmentation".to_string(),
            message,
        },
    );
}
