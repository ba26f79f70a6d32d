//! Decoded datasets and the dataset-to-field factory.
//!
//! Parsing DICOM files happens elsewhere; this module works on an already decoded
//! [`Dataset`] carrying geometry, the raw pixel payload and segmentation metadata.
use std::fmt;

use glam::{Mat4, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod factory;
pub mod split;

pub use factory::{fields_from_dataset, fields_from_dataset_with_diagnostics};
pub use split::{split_segments, split_segments_with_diagnostics};

/// Storage class of a dataset, by SOP class name.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SopClass {
    CtImage,
    MrImage,
    EnhancedCtImage,
    LegacyConvertedEnhancedCtImage,
    UltrasoundMultiframeImage,
    EnhancedMrImage,
    MrSpectroscopy,
    EnhancedMrColorImage,
    LegacyConvertedEnhancedMrImage,
    UltrasoundImage,
    EnhancedUsVolume,
    SecondaryCaptureImage,
    UsImage,
    PetImage,
    EnhancedPetImage,
    LegacyConvertedEnhancedPetImage,
    Segmentation,
    DeformableSpatialRegistration,
    Other(String),
}

const NAMES: [(&str, SopClass); 18] = [
    ("CTImage", SopClass::CtImage),
    ("MRImage", SopClass::MrImage),
    ("EnhancedCTImage", SopClass::EnhancedCtImage),
    (
        "LegacyConvertedEnhancedCTImage",
        SopClass::LegacyConvertedEnhancedCtImage,
    ),
    (
        "UltrasoundMultiframeImage",
        SopClass::UltrasoundMultiframeImage,
    ),
    ("EnhancedMRImage", SopClass::EnhancedMrImage),
    ("MRSpectroscopy", SopClass::MrSpectroscopy),
    ("EnhancedMRColorImage", SopClass::EnhancedMrColorImage),
    (
        "LegacyConvertedEnhancedMRImage",
        SopClass::LegacyConvertedEnhancedMrImage,
    ),
    ("UltrasoundImage", SopClass::UltrasoundImage),
    ("EnhancedUSVolume", SopClass::EnhancedUsVolume),
    ("SecondaryCaptureImage", SopClass::SecondaryCaptureImage),
    ("USImage", SopClass::UsImage),
    ("PETImage", SopClass::PetImage),
    ("EnhancedPETImage", SopClass::EnhancedPetImage),
    (
        "LegacyConvertedEnhancedPETImage",
        SopClass::LegacyConvertedEnhancedPetImage,
    ),
    ("Segmentation", SopClass::Segmentation),
    (
        "DeformableSpatialRegistration",
        SopClass::DeformableSpatialRegistration,
    ),
];

impl SopClass {
    /// Looks up a SOP class by its dictionary name; unknown names become `Other`.
    pub fn from_name(name: &str) -> Self {
        NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, class)| class.clone())
            .unwrap_or_else(|| SopClass::Other(name.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            SopClass::Other(name) => name,
            known => NAMES
                .iter()
                .find(|(_, class)| class == known)
                .map_or("", |(n, _)| *n),
        }
    }

    /// Whether datasets of this class become an image field.
    pub fn is_image(&self) -> bool {
        !matches!(
            self,
            SopClass::Segmentation | SopClass::DeformableSpatialRegistration | SopClass::Other(_)
        )
    }
}

impl fmt::Display for SopClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel spacing information shared by all frames.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelMeasures {
    /// Row spacing, column spacing (mm).
    pub pixel_spacing: [f32; 2],
    pub slice_thickness: f32,
    pub spacing_between_slices: f32,
}

impl Default for PixelMeasures {
    fn default() -> Self {
        Self {
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 1.0,
            spacing_between_slices: 1.0,
        }
    }
}

/// One segment of a segmentation dataset.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// 1-based segment number.
    pub number: u32,
    pub label: String,
    /// DICOM-scaled CIELab display color.
    pub recommended_display_cielab: [u16; 3],
}

impl Segment {
    pub fn new(
        number: u32,
        label: impl Into<String>,
        recommended_display_cielab: [u16; 3],
    ) -> Self {
        Self {
            number,
            label: label.into(),
            recommended_display_cielab,
        }
    }
}

/// Per-frame functional group of a multi-frame dataset.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameGroup {
    /// Segment the frame belongs to (segmentation datasets only).
    pub referenced_segment_number: u32,
    pub image_position_patient: Option<Vec3>,
}

impl FrameGroup {
    pub fn for_segment(referenced_segment_number: u32) -> Self {
        Self {
            referenced_segment_number,
            image_position_patient: None,
        }
    }
}

/// A decoded dataset.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub sop_class: SopClass,
    pub rows: u32,
    pub columns: u32,
    pub number_of_frames: u32,
    pub bits_allocated: u16,
    /// Little-endian pixel payload.
    pub pixel_data: Vec<u8>,
    pub rescale_slope: f32,
    pub rescale_intercept: f32,
    pub window_center: Option<f32>,
    pub window_width: Option<f32>,
    pub pixel_measures: Option<PixelMeasures>,
    pub segments: Vec<Segment>,
    pub per_frame_groups: Vec<FrameGroup>,
    /// Explicit patient → voxel index mapping; derived from the pixel measures when absent.
    pub patient_to_pixel: Option<Mat4>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            sop_class: SopClass::Other(String::new()),
            rows: 0,
            columns: 0,
            number_of_frames: 0,
            bits_allocated: 16,
            pixel_data: Vec::new(),
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            window_center: None,
            window_width: None,
            pixel_measures: None,
            segments: Vec::new(),
            per_frame_groups: Vec::new(),
            patient_to_pixel: None,
        }
    }
}

impl Dataset {
    pub fn new(sop_class: SopClass, columns: u32, rows: u32, number_of_frames: u32) -> Self {
        Self {
            sop_class,
            rows,
            columns,
            number_of_frames,
            ..Self::default()
        }
    }

    pub fn pixels_per_frame(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// Bytes one 1-bit frame occupies when frames are packed back to back.
    pub fn packed_frame_bytes(&self) -> usize {
        self.pixels_per_frame().div_ceil(8)
    }

    /// Patient → voxel index mapping.
    ///
    /// Without an explicit matrix, voxels are axis aligned with the patient frame, scaled
    /// by the pixel measures and anchored at the first frame's position.
    pub fn patient_to_pixel(&self) -> Mat4 {
        if let Some(m) = self.patient_to_pixel {
            return m;
        }
        let measures = self.pixel_measures.unwrap_or_default();
        let spacing = Vec3::new(
            measures.pixel_spacing[1],
            measures.pixel_spacing[0],
            measures.spacing_between_slices,
        );
        let origin = self
            .per_frame_groups
            .first()
            .and_then(|g| g.image_position_patient)
            .unwrap_or(Vec3::ZERO);
        let pixel_to_patient = Mat4::from_translation(origin) * Mat4::from_scale(spacing);
        pixel_to_patient.inverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sop_class_names_round_trip_through_lookup() {
        for (name, class) in NAMES.iter() {
            assert_eq!(SopClass::from_name(name), *class);
            assert_eq!(class.name(), *name);
        }
        assert_eq!(
            SopClass::from_name("RTStructureSet"),
            SopClass::Other("RTStructureSet".into())
        );
    }

    #[test]
    fn image_classes() {
        assert!(SopClass::CtImage.is_image());
        assert!(SopClass::LegacyConvertedEnhancedPetImage.is_image());
        assert!(!SopClass::Segmentation.is_image());
        assert!(!SopClass::Other("x".into()).is_image());
    }

    #[test]
    fn default_mapping_uses_pixel_measures() {
        let mut ds = Dataset::new(SopClass::CtImage, 4, 4, 2);
        ds.pixel_measures = Some(PixelMeasures {
            pixel_spacing: [0.5, 0.25],
            slice_thickness: 2.0,
            spacing_between_slices: 2.0,
        });
        ds.per_frame_groups = vec![FrameGroup {
            referenced_segment_number: 0,
            image_position_patient: Some(Vec3::new(10.0, 0.0, 0.0)),
        }];
        let pixel = ds.patient_to_pixel().transform_point3(Vec3::new(10.5, 1.0, 4.0));
        assert!((pixel - Vec3::new(2.0, 2.0, 2.0)).abs().max_element() < 1e-5);
    }

    #[test]
    fn packed_frames_round_up() {
        let ds = Dataset::new(SopClass::Segmentation, 3, 3, 1);
        assert_eq!(ds.packed_frame_bytes(), 2);
    }
}
