//! Conversion of DICOM CIELab display values to sRGB.
//!
//! DICOM encodes recommended display colors as three unsigned 16-bit values scaled from
//! `L* ∈ [0, 100]` and `a*, b* ∈ [-128, 127]`. Conversion goes through CIE XYZ under the D65
//! white point, then the linear sRGB matrix and the sRGB transfer curve.
use glam::{Mat3, Vec3};

const D65_WHITE: Vec3 = Vec3::new(0.95047, 1.0, 1.08883);

/// Unscales a DICOM Lab triple to `(L*, a*, b*)`.
pub fn dicom_lab_to_lab(lab: [u16; 3]) -> Vec3 {
    Vec3::new(
        lab[0] as f32 * 100.0 / 65535.0,
        lab[1] as f32 * 255.0 / 65535.0 - 128.0,
        lab[2] as f32 * 255.0 / 65535.0 - 128.0,
    )
}

pub fn lab_to_xyz(lab: Vec3) -> Vec3 {
    let y = (lab.x + 16.0) / 116.0;
    let x = lab.y / 500.0 + y;
    let z = y - lab.z / 200.0;
    let f = |t: f32| {
        let cube = t * t * t;
        if cube > 0.008856 {
            cube
        } else {
            (t - 16.0 / 116.0) / 7.787
        }
    };
    Vec3::new(f(x), f(y), f(z)) * D65_WHITE
}

/// Converts XYZ to gamma-encoded sRGB, clamped to `[0, 1]`.
pub fn xyz_to_srgb(xyz: Vec3) -> Vec3 {
    let m = Mat3::from_cols(
        Vec3::new(3.2406, -0.9689, 0.0557),
        Vec3::new(-1.5372, 1.8758, -0.2040),
        Vec3::new(-0.4986, 0.0415, 1.0570),
    );
    let linear = m * xyz;
    let gamma = |v: f32| {
        let encoded = if v > 0.0031308 {
            1.055 * v.powf(1.0 / 2.4) - 0.055
        } else {
            12.92 * v
        };
        encoded.clamp(0.0, 1.0)
    };
    Vec3::new(gamma(linear.x), gamma(linear.y), gamma(linear.z))
}

/// Converts a DICOM-scaled CIELab triple to sRGB in `[0, 1]`.
pub fn dicom_lab_to_rgb(lab: [u16; 3]) -> Vec3 {
    xyz_to_srgb(lab_to_xyz(dicom_lab_to_lab(lab)))
}
