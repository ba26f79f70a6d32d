//! Camera parameters shared with the ray-cast renderer.
//!
//! [`View`] holds the eye point and frame, the clipping box and the near/far range a
//! renderer needs, and publishes them as uniforms through the same typed marshaling the
//! generators use.
use glam::{Mat4, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::uniforms::UniformMap;

/// Far clipping distance of an unbounded view, about `f32::MAX`.
pub const UNBOUNDED_FAR: f32 = 3e38;

/// Anatomical plane for [`View::slice`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SlicePlane {
    /// Looking from below at an LPS slice.
    #[default]
    Axial,
    /// Nose pointing left.
    Sagittal,
    Coronal,
}

/// Axis-aligned bounds in patient space.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Parameters of [`View::slice`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SliceOptions {
    pub plane: SlicePlane,
    /// Fraction of `min + max` the view is centered on.
    pub offset: f32,
    /// Slab thickness; zero renders a single plane.
    pub thickness: f32,
    pub magnification: f32,
    /// Bounds to frame; the view box when absent.
    pub bounds: Option<Bounds>,
    pub target: Option<Vec3>,
    pub extent: Option<Vec3>,
}

impl Default for SliceOptions {
    fn default() -> Self {
        Self {
            plane: SlicePlane::Axial,
            offset: 0.5,
            thickness: 0.0,
            magnification: 1.0,
            bounds: None,
            target: None,
            extent: None,
        }
    }
}

impl SliceOptions {
    pub fn new(plane: SlicePlane) -> Self {
        Self {
            plane,
            ..Self::default()
        }
    }

    /// Sets the slab thickness.
    pub fn with_thickness(mut self, thickness: f32) -> Self {
        self.thickness = thickness;
        self
    }

    /// Sets the magnification.
    pub fn with_magnification(mut self, magnification: f32) -> Self {
        self.magnification = magnification;
        self
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the bounds to frame.
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Camera and clipping parameters of a rendered view.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub view_point: Vec3,
    pub view_normal: Vec3,
    pub view_right: Vec3,
    pub view_up: Vec3,
    pub view_distance: f32,
    pub view_box_min: Vec3,
    pub view_box_max: Vec3,
    /// Field of view in degrees.
    pub view_angle: f32,
    pub view_near: f32,
    pub view_far: f32,
}

impl Default for View {
    fn default() -> Self {
        let view_point = Vec3::new(0.0, 0.0, -30.0);
        let mut view = Self {
            view_point,
            view_normal: Vec3::new(0.0, 0.0, 1.5).normalize(),
            view_right: Vec3::X,
            view_up: Vec3::NEG_Y,
            view_distance: view_point.length(),
            view_box_min: Vec3::splat(-3.0),
            view_box_max: Vec3::splat(3.0),
            view_angle: 30.0,
            view_near: 0.0,
            view_far: UNBOUNDED_FAR,
        };
        let (at, from, up) = (view.target(), view.view_point, view.view_up);
        view.look(at, from, up);
        view
    }
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// The point `view_distance` along the view normal.
    pub fn target(&self) -> Vec3 {
        self.view_point + self.view_normal.normalize_or_zero() * self.view_distance
    }

    /// Looks from `from` toward `at`, re-orthogonalizing the frame around `up`.
    pub fn look(&mut self, at: Vec3, from: Vec3, up: Vec3) {
        self.view_normal = (at - from).normalize_or_zero();
        self.view_right = self.view_normal.cross(up).normalize_or_zero();
        self.view_up = self.view_right.cross(self.view_normal);
        self.view_point = from;
        self.view_distance = at.distance(from);
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.view_box_min = bounds.min;
        self.view_box_max = bounds.max;
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.view_box_min, self.view_box_max)
    }

    /// Frames an anatomical plane through the bounds, clipping to a slab of
    /// `options.thickness` around the target.
    pub fn slice(&mut self, options: &SliceOptions) {
        let bounds = options.bounds.unwrap_or_else(|| self.bounds());
        let target = options
            .target
            .unwrap_or((bounds.min + bounds.max) * options.offset);
        let extent = options.extent.unwrap_or_else(|| bounds.extent());

        let (right, up, normal, direction) = match options.plane {
            SlicePlane::Axial => (Vec3::X, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z),
            SlicePlane::Sagittal => (Vec3::Y, Vec3::Z, Vec3::NEG_X, Vec3::X),
            SlicePlane::Coronal => (Vec3::X, Vec3::Z, Vec3::Y, Vec3::NEG_Y),
        };
        self.view_right = right;
        self.view_up = up;
        self.view_normal = normal;

        let window_right = extent.dot(right).abs() / options.magnification;
        self.view_distance = window_right / self.view_angle.to_radians().tan();
        self.view_point = target + direction * self.view_distance;
        self.view_near = self.view_distance - 0.5 * options.thickness;
        self.view_far = self.view_distance + 0.5 * options.thickness;
        debug!(
            "Slicing {:?} at distance {} (near {}, far {}).",
            options.plane, self.view_distance, self.view_near, self.view_far
        );
    }

    /// Orbits the eye about the target, `rightward` degrees about the up vector, then
    /// `upward` degrees about the right vector.
    pub fn orbit(&mut self, rightward: f32, upward: f32) {
        let target = self.target();
        let rotation = Mat4::from_translation(target)
            * Mat4::from_axis_angle(self.view_right, upward.to_radians())
            * Mat4::from_axis_angle(self.view_up, rightward.to_radians())
            * Mat4::from_translation(-target);
        let from = rotation.transform_point3(self.view_point);
        let up = self.view_up;
        self.look(target, from, up);
    }

    pub fn uniforms(&self) -> UniformMap {
        let mut u = UniformMap::new();
        u.insert("viewPoint", self.view_point)
            .insert("viewNormal", self.view_normal)
            .insert("viewRight", self.view_right)
            .insert("viewUp", self.view_up)
            .insert("viewBoxMin", self.view_box_min)
            .insert("viewBoxMax", self.view_box_max)
            .insert(
                "halfSinViewAngle",
                0.5 * self.view_angle.to_radians().sin(),
            )
            .insert("viewNear", self.view_near)
            .insert("viewFar", self.view_far);
        u
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::UniformValue;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn default_view_looks_along_z() {
        let view = View::default();
        assert!(close(view.view_normal, Vec3::Z));
        assert!(close(view.view_right, Vec3::X));
        assert!(close(view.view_up, Vec3::NEG_Y));
        assert!(close(view.target(), Vec3::ZERO));
        assert_eq!(view.view_far, UNBOUNDED_FAR);
    }

    #[test]
    fn axial_slice_clips_to_a_slab() {
        let mut view = View::default();
        view.slice(&SliceOptions::new(SlicePlane::Axial).with_thickness(2.0));
        let distance = 6.0 / 30f32.to_radians().tan();
        assert!((view.view_distance - distance).abs() < 1e-3);
        assert!(close(view.view_point, Vec3::new(0.0, 0.0, -distance)));
        assert!((view.view_far - view.view_near - 2.0).abs() < 1e-3);
    }

    #[test]
    fn magnification_moves_the_eye_closer() {
        let mut near = View::default();
        near.slice(&SliceOptions::new(SlicePlane::Coronal).with_magnification(2.0));
        let mut far = View::default();
        far.slice(&SliceOptions::new(SlicePlane::Coronal));
        assert!((far.view_distance - 2.0 * near.view_distance).abs() < 1e-3);
    }

    #[test]
    fn orbit_keeps_the_target_and_distance() {
        let mut view = View::default();
        let target = view.target();
        let distance = view.view_distance;
        view.orbit(90.0, 0.0);
        assert!(close(view.target(), target));
        assert!((view.view_distance - distance).abs() < 1e-3);
        assert!(view.view_normal.dot(Vec3::Z).abs() < 1e-4);
    }

    #[test]
    fn uniforms_cover_the_renderer_interface() {
        let u = View::default().uniforms();
        assert_eq!(u.len(), 9);
        let half_sin = u.get("halfSinViewAngle").and_then(UniformValue::as_f32).unwrap();
        assert!((half_sin - 0.25).abs() < 1e-6);
        assert!(u.contains("viewBoxMax"));
    }
}
