use glam::{Mat4, Vec3, Vec4};

use crate::error::{RenderError, RenderResult};

/// Calibration frustum of an imaging device: four detector corners and the
/// source position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pyramid {
    left_top: Vec3,
    left_bottom: Vec3,
    right_top: Vec3,
    right_bottom: Vec3,
    eye: Vec3,

    center: Vec3,
    middle: Vec3,
    up: Vec3,
    view: Vec3,
    fovy: f32,
    distance: f32,
    corners: Mat4,

    color: Vec4,
}

impl Default for Pyramid {
    fn default() -> Self {
        Self::new(
            Vec3::new(-100.0, 100.0, 0.0),
            Vec3::new(-100.0, -100.0, 0.0),
            Vec3::new(100.0, 100.0, 0.0),
            Vec3::new(100.0, -100.0, 0.0),
            Vec3::new(0.0, 0.0, 500.0),
        )
    }
}

impl Pyramid {
    pub const DEFAULT_COLOR: Vec4 = Vec4::new(0.2, 0.2, 0.8, 1.0);

    pub fn new(left_top: Vec3, left_bottom: Vec3, right_top: Vec3, right_bottom: Vec3, eye: Vec3) -> Self {
        let m0 = left_top + (right_top - left_top) / 2.0;
        let m1 = left_bottom + (right_bottom - left_bottom) / 2.0;
        let center = m0 + (m1 - m0) / 2.0;

        let cos = (m0 - eye)
            .normalize_or_zero()
            .dot((m1 - eye).normalize_or_zero())
            .clamp(-1.0, 1.0);

        Self {
            left_top,
            left_bottom,
            right_top,
            right_bottom,
            eye,
            center,
            middle: center + (eye - center) / 2.0,
            up: (left_top - left_bottom).normalize_or_zero(),
            view: (eye - center).normalize_or_zero(),
            fovy: cos.acos().to_degrees(),
            distance: eye.distance(center),
            corners: Mat4::from_cols(
                left_top.extend(1.0),
                left_bottom.extend(1.0),
                right_top.extend(1.0),
                right_bottom.extend(1.0),
            ),
            color: Self::DEFAULT_COLOR,
        }
    }

    /// Five points packed as `[lt, lb, rt, rb, eye]`, three floats each.
    pub fn from_array(array: &[f32; 15]) -> Self {
        let p = |i: usize| Vec3::from_slice(&array[i * 3..i * 3 + 3]);
        Self::new(p(0), p(1), p(2), p(3), p(4))
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.eye.abs_diff_eq(self.center, f32::EPSILON) {
            return Err(RenderError::DegenerateFrustum("eye coincides with center".into()));
        }
        if self.up == Vec3::ZERO {
            return Err(RenderError::DegenerateFrustum("left edge has zero length".into()));
        }
        if self.view == Vec3::ZERO {
            return Err(RenderError::DegenerateFrustum("view direction is zero".into()));
        }
        Ok(())
    }

    /// Copy moved by `T * Rz * Ry * Rx`, angles in degrees.
    pub fn transformed(&self, rx: f32, ry: f32, rz: f32, tx: f32, ty: f32, tz: f32) -> Self {
        let m = Mat4::from_translation(Vec3::new(tx, ty, tz))
            * Mat4::from_rotation_z(rz.to_radians())
            * Mat4::from_rotation_y(ry.to_radians())
            * Mat4::from_rotation_x(rx.to_radians());
        let mut result = Self::new(
            m.transform_point3(self.left_top),
            m.transform_point3(self.left_bottom),
            m.transform_point3(self.right_top),
            m.transform_point3(self.right_bottom),
            m.transform_point3(self.eye),
        );
        result.color = self.color;
        result
    }

    pub fn left_top(&self) -> Vec3 {
        self.left_top
    }

    pub fn left_bottom(&self) -> Vec3 {
        self.left_bottom
    }

    pub fn right_top(&self) -> Vec3 {
        self.right_top
    }

    pub fn right_bottom(&self) -> Vec3 {
        self.right_bottom
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn middle(&self) -> Vec3 {
        self.middle
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn view(&self) -> Vec3 {
        self.view
    }

    /// Vertical field of view in degrees.
    pub fn fovy(&self) -> f32 {
        self.fovy
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Columns are the homogeneous left-top, left-bottom, right-top and
    /// right-bottom corners.
    pub fn corners(&self) -> Mat4 {
        self.corners
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn square_frustum_geometry() {
        let pyramid = Pyramid::default();
        assert_relative_eq!(pyramid.center().distance(Vec3::ZERO), 0.0);
        assert_relative_eq!(pyramid.distance(), 500.0);
        assert_relative_eq!(pyramid.view().distance(Vec3::Z), 0.0);
        assert_relative_eq!(pyramid.up().distance(Vec3::Y), 0.0);
        assert_relative_eq!(pyramid.middle().distance(Vec3::new(0.0, 0.0, 250.0)), 0.0);

        let expected = 2.0 * (100.0f32 / 500.0).atan().to_degrees();
        assert_relative_eq!(pyramid.fovy(), expected, epsilon = 1e-3);
        assert!(pyramid.validate().is_ok());
    }

    #[test]
    fn corners_are_columns() {
        let pyramid = Pyramid::default();
        let corners = pyramid.corners();
        assert_eq!(corners.col(0), Vec4::new(-100.0, 100.0, 0.0, 1.0));
        assert_eq!(corners.col(3), Vec4::new(100.0, -100.0, 0.0, 1.0));
    }

    #[test]
    fn from_array_matches_new() {
        let array = [
            -100.0, 100.0, 0.0, -100.0, -100.0, 0.0, 100.0, 100.0, 0.0, 100.0, -100.0, 0.0, 0.0,
            0.0, 500.0,
        ];
        assert_eq!(Pyramid::from_array(&array), Pyramid::default());
    }

    #[test]
    fn degenerate_eye_is_rejected() {
        let pyramid = Pyramid::new(
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::ZERO,
        );
        assert!(matches!(pyramid.validate(), Err(RenderError::DegenerateFrustum(_))));
    }

    #[test]
    fn transformed_moves_every_point() {
        let pyramid = Pyramid::default().transformed(0.0, 0.0, 90.0, 10.0, 0.0, 0.0);
        assert_relative_eq!(pyramid.eye().distance(Vec3::new(10.0, 0.0, 500.0)), 0.0, epsilon = 1e-3);
        assert_relative_eq!(pyramid.up().distance(-Vec3::X), 0.0, epsilon = 1e-5);
        assert_relative_eq!(pyramid.distance(), 500.0, epsilon = 1e-3);
        assert_eq!(pyramid.color(), Pyramid::DEFAULT_COLOR);
    }
}
