use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::config::RenderSettings;
use crate::error::{RenderError, RenderResult};
use crate::model::Pyramid;

/// Clip planes of the calibrated projection, applied before a uniform 0.1
/// scale of view space.
const NEAR: f32 = 1.0;
const FAR: f32 = 1000.0;
const VIEW_SCALE: f32 = 0.1;

/// Wraps an angle in degrees into `[0, 360)`.
pub fn normalize_angle(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Model placement: translation and rotation matrices plus the Euler
/// angles (degrees) the rotation was built from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    translation: Mat4,
    rotation: Mat4,
    angles: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            translation: Mat4::IDENTITY,
            rotation: Mat4::IDENTITY,
            angles: Vec3::ZERO,
        }
    }
}

impl Pose {
    pub fn set_translation(&mut self, position: Vec3) {
        self.translation = Mat4::from_translation(position);
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.translation *= Mat4::from_translation(offset);
    }

    pub fn translation(&self) -> Vec3 {
        self.translation.w_axis.truncate()
    }

    pub fn translation_matrix(&self) -> Mat4 {
        self.translation
    }

    /// `R = Rz * Ry * Rx` with every angle wrapped into `[0, 360)`.
    pub fn set_rotation(&mut self, angles: Vec3) {
        self.angles = Vec3::new(normalize_angle(angles.x), normalize_angle(angles.y), normalize_angle(angles.z));
        self.rotation = Mat4::from_rotation_z(self.angles.z.to_radians())
            * Mat4::from_rotation_y(self.angles.y.to_radians())
            * Mat4::from_rotation_x(self.angles.x.to_radians());
    }

    pub fn rotate(&mut self, delta: Vec3) {
        self.set_rotation(self.angles + delta);
    }

    /// Replaces the rotation. The stored angles are left as they were.
    pub fn set_rotation_matrix(&mut self, rotation: Mat4) {
        self.rotation = rotation;
    }

    pub fn rotation(&self) -> Vec3 {
        self.angles
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        self.rotation
    }

    /// `T * R`
    pub fn model_matrix(&self) -> Mat4 {
        self.translation * self.rotation
    }
}

/// Look-at camera constrained by a calibration frustum.
#[derive(Clone, Copy, Debug)]
pub struct ViewCamera {
    pyramid: Pyramid,
    eye: Vec3,
    center: Vec3,
    matrix: Mat4,
}

impl Default for ViewCamera {
    fn default() -> Self {
        let pyramid = Pyramid::default();
        Self {
            pyramid,
            eye: pyramid.eye(),
            center: pyramid.center(),
            matrix: Mat4::look_at_rh(pyramid.eye(), pyramid.center(), pyramid.up()),
        }
    }
}

impl ViewCamera {
    pub fn new(pyramid: Pyramid) -> RenderResult<Self> {
        let mut camera = Self::default();
        camera.set_perspective(pyramid)?;
        Ok(camera)
    }

    /// Stores the frustum and moves the camera onto its eye and center.
    pub fn set_perspective(&mut self, pyramid: Pyramid) -> RenderResult<()> {
        pyramid.validate()?;
        self.pyramid = pyramid;
        self.set_camera_pyramid(&pyramid)
    }

    pub fn perspective(&self) -> &Pyramid {
        &self.pyramid
    }

    /// An eye on top of the center is pushed back along the frustum view
    /// direction by the frustum distance.
    pub fn set_camera(&mut self, eye: Vec3, center: Vec3) -> RenderResult<()> {
        let eye = if eye == center {
            eye + self.pyramid.view() * self.pyramid.distance()
        } else {
            eye
        };
        if eye == center {
            log::error!("Camera eye coincides with center at {center}");
            return Err(RenderError::DegenerateFrustum("camera eye coincides with center".into()));
        }

        self.eye = eye;
        self.center = center;
        self.matrix = Mat4::look_at_rh(eye, center, self.pyramid.up());
        Ok(())
    }

    pub fn set_camera_pyramid(&mut self, pyramid: &Pyramid) -> RenderResult<()> {
        self.set_camera(pyramid.eye(), pyramid.center())
    }

    /// Shifts eye and center along `normalize(eye - center)`.
    pub fn move_camera(&mut self, distance: f32, center: Vec3) -> RenderResult<()> {
        let direction = (self.eye - center).normalize_or_zero();
        self.set_camera(self.eye + direction * distance, self.center + direction * distance)
    }

    /// Orbits eye and center about `center`: `x_deg` about `up x view`,
    /// `y_deg` about `up`. Falls back to the `up` rotation alone when the
    /// view would end up nearly parallel to `up`.
    pub fn rotate_camera(&mut self, x_deg: f32, y_deg: f32, center: Vec3) -> RenderResult<()> {
        let up = self.pyramid.up();
        let view = self.view_dir();

        let about_up = Mat3::from_axis_angle(up, y_deg.to_radians());
        let side = up.cross(view).normalize_or_zero();
        let mut rotation = if side == Vec3::ZERO {
            about_up
        } else {
            Mat3::from_axis_angle(side, x_deg.to_radians()) * about_up
        };

        if (rotation * view).dot(up).abs() > 0.99 {
            rotation = about_up;
        }

        let eye = rotation * (self.eye - center) + center;
        let target = rotation * (self.center - center) + center;
        self.set_camera(eye, target)
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn middle(&self) -> Vec3 {
        self.pyramid.middle()
    }

    pub fn view_dir(&self) -> Vec3 {
        (self.eye - self.center).normalize_or_zero()
    }

    pub fn set_eye(&mut self, eye: Vec3) -> RenderResult<()> {
        self.set_camera(eye, self.center)
    }

    pub fn set_center(&mut self, center: Vec3) -> RenderResult<()> {
        self.set_camera(self.eye, center)
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    /// Perspective from the frustum field of view and the target aspect.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.pyramid.fovy().to_radians(), aspect, NEAR, FAR)
            * Mat4::from_scale(Vec3::splat(VIEW_SCALE))
    }
}

/// Axis-aligned rectangle in normalized device coordinates. Corners may be
/// given in any order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// Screen-space rectangle spanned by the left-top and right-bottom frustum
/// corners under `view_projection`.
pub fn frustum_rect(view_projection: Mat4, corners: Mat4) -> Rect {
    let projected = view_projection * corners;
    let left_top = projected.x_axis;
    let right_bottom = projected.w_axis;
    Rect::from_corners(
        (left_top.truncate() / left_top.w).truncate(),
        (right_bottom.truncate() / right_bottom.w).truncate(),
    )
}

/// True for every vertex whose projection under `transform` falls in `rect`.
pub fn vertices_mask(vertices: &[Vec3], transform: Mat4, rect: Rect) -> Vec<bool> {
    vertices
        .iter()
        .map(|&v| {
            let clip = transform * v.extend(1.0);
            rect.contains(Vec2::new(clip.x, clip.y) / clip.w)
        })
        .collect()
}

/// Per-frame uniform block shared by every pass of one surface.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub matrix: [[f32; 4]; 4],
    pub pyramid_matrix: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub corners: [[f32; 4]; 4],
    pub pyramid_color: [f32; 4],
    pub eye_model: [f32; 4],
    pub crop: [u32; 4],
    pub flags: [u32; 4],
    pub params: [f32; 4],
}

impl FrameUniforms {
    pub fn new(
        projection: Mat4,
        camera: &ViewCamera,
        pose: &Pose,
        settings: &RenderSettings,
        crop: [u32; 4],
    ) -> Self {
        let view_projection = projection * camera.matrix();
        let model = pose.model_matrix();
        let model_view = camera.matrix() * model;
        let normal_matrix = Mat3::from_mat4(model_view).inverse().transpose();
        let eye_model = model.inverse() * camera.eye().extend(1.0);
        let pyramid = camera.perspective();

        Self {
            matrix: (view_projection * model).to_cols_array_2d(),
            pyramid_matrix: view_projection.to_cols_array_2d(),
            normal_matrix: Mat4::from_mat3(normal_matrix).to_cols_array_2d(),
            corners: pyramid.corners().to_cols_array_2d(),
            pyramid_color: pyramid.color().to_array(),
            eye_model: (eye_model / eye_model.w).to_array(),
            crop,
            flags: [
                settings.x_mirroring as u32,
                settings.polygonal_lighting as u32,
                settings.line_radius(),
                0,
            ],
            params: Vec4::new(settings.intensity_scale(), settings.param, 0.0, 0.0).to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn angles_wrap_into_range() {
        assert_relative_eq!(normalize_angle(-90.0), 270.0);
        assert_relative_eq!(normalize_angle(720.0), 0.0);
        assert_relative_eq!(normalize_angle(359.5), 359.5);
        assert!(normalize_angle(-1e-8) < 360.0);
    }

    #[test]
    fn rotation_order_is_z_y_x() {
        let mut pose = Pose::default();
        pose.set_rotation(Vec3::new(90.0, 0.0, 90.0));
        // Rx takes Y to Z, Rz leaves Z alone
        let v = pose.rotation_matrix().transform_vector3(Vec3::Y);
        assert_abs_diff_eq!(v.distance(Vec3::Z), 0.0, epsilon = 1e-6);

        pose.rotate(Vec3::new(-180.0, 0.0, 0.0));
        assert_relative_eq!(pose.rotation().x, 270.0);
    }

    #[test]
    fn rotation_matrix_keeps_angles() {
        let mut pose = Pose::default();
        pose.set_rotation(Vec3::new(10.0, 20.0, 30.0));
        pose.set_rotation_matrix(Mat4::IDENTITY);
        assert_eq!(pose.rotation(), Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(pose.rotation_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn translate_accumulates() {
        let mut pose = Pose::default();
        pose.set_translation(Vec3::new(1.0, 2.0, 3.0));
        pose.translate(Vec3::new(1.0, 0.0, -3.0));
        assert_eq!(pose.translation(), Vec3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn coincident_eye_is_pushed_back() {
        let mut camera = ViewCamera::default();
        camera.set_camera(Vec3::ZERO, Vec3::ZERO).unwrap();
        assert_abs_diff_eq!(camera.eye().distance(Vec3::new(0.0, 0.0, 500.0)), 0.0, epsilon = 1e-3);
        assert_eq!(camera.center(), Vec3::ZERO);
    }

    #[test]
    fn move_camera_keeps_direction() {
        let mut camera = ViewCamera::default();
        camera.move_camera(100.0, Vec3::ZERO).unwrap();
        assert_abs_diff_eq!(camera.eye().z, 600.0, epsilon = 1e-3);
        assert_abs_diff_eq!(camera.center().z, 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(camera.view_dir().distance(Vec3::Z), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rotate_camera_orbits_center() {
        let mut camera = ViewCamera::default();
        camera.rotate_camera(0.0, 90.0, Vec3::ZERO).unwrap();
        assert_abs_diff_eq!(camera.eye().distance(Vec3::new(500.0, 0.0, 0.0)), 0.0, epsilon = 1e-3);

        // tilting straight onto the up axis falls back to the y rotation
        let mut camera = ViewCamera::default();
        camera.rotate_camera(90.0, 0.0, Vec3::ZERO).unwrap();
        assert_abs_diff_eq!(camera.eye().distance(Vec3::new(0.0, 0.0, 500.0)), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn frustum_corners_map_to_screen_edges() {
        let camera = ViewCamera::default();
        let rect = frustum_rect(camera.projection(1.0) * camera.matrix(), camera.perspective().corners());
        assert_abs_diff_eq!(rect.min.x, -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(rect.max.x, 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(rect.min.y, -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(rect.max.y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn mask_selects_vertices_inside() {
        let camera = ViewCamera::default();
        let view_projection = camera.projection(1.0) * camera.matrix();
        let rect = frustum_rect(view_projection, camera.perspective().corners());
        let vertices = [Vec3::ZERO, Vec3::new(50.0, -50.0, 0.0), Vec3::new(150.0, 0.0, 0.0)];

        let mask = vertices_mask(&vertices, view_projection, rect);
        assert_eq!(mask, vec![true, true, false]);

        let small = Rect::from_corners(Vec2::new(0.1, 0.1), Vec2::new(-0.1, -0.1));
        assert_eq!(vertices_mask(&vertices, view_projection, small), vec![true, false, false]);
    }

    #[test]
    fn frame_uniforms_carry_model_space_eye() {
        let camera = ViewCamera::default();
        let mut pose = Pose::default();
        pose.set_translation(Vec3::new(0.0, 0.0, 100.0));
        let settings = RenderSettings::default();

        let frame = FrameUniforms::new(camera.projection(1.0), &camera, &pose, &settings, [0, 0, 512, 512]);
        assert_abs_diff_eq!(frame.eye_model[2], 400.0, epsilon = 1e-3);
        assert_eq!(frame.flags[1], 1);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 336);
    }
}
