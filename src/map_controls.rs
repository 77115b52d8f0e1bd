use std::f32::consts::FRAC_PI_2;

use glam::{Quat, Vec2, Vec3};
use winit::event::MouseButton;

use crate::camera::Camera;
use crate::input::Input;

/// Smallest angle kept between the view direction and the up axis.
const MIN_POLAR: f32 = 0.01;

/// Map-style camera controls around a target on the ground plane.
///
/// Primary drag pans the target across the plane normal to `up`, secondary
/// drag orbits around it, and the wheel zooms. Set `enabled` to `false` to
/// freeze the camera, e.g. while an instance is being dragged.
///
/// # Example
/// ```
/// use herd::{MapControls, Vec3};
///
/// let controls = MapControls::new()
///     .up(Vec3::Z)
///     .looking_from(Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO);
/// let camera = controls.camera();
/// assert!(camera.position.abs_diff_eq(Vec3::new(0.0, 0.0, 30.0), 0.5));
/// ```
#[derive(Clone, Debug)]
pub struct MapControls {
    pub target: Vec3,
    pub up: Vec3,
    /// Distance from target.
    pub distance: f32,
    /// Rotation around `up`, in radians.
    pub azimuth: f32,
    /// Angle between `up` and the target-to-camera direction, in radians.
    pub polar: f32,
    pub max_polar: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    /// Radians per pixel of secondary drag.
    pub rotate_sensitivity: f32,
    /// Zoom factor per wheel line.
    pub zoom_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub enabled: bool,
}

impl Default for MapControls {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            up: Vec3::Z,
            distance: 30.0,
            azimuth: 0.0,
            polar: MIN_POLAR,
            max_polar: FRAC_PI_2 - MIN_POLAR,
            fov: 75f32.to_radians(),
            rotate_sensitivity: 0.005,
            zoom_factor: 0.95,
            min_distance: 1.0,
            max_distance: 500.0,
            enabled: true,
        }
    }
}

impl MapControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up(mut self, up: Vec3) -> Self {
        self.up = up.normalize_or(Vec3::Z);
        self
    }

    pub fn target(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    pub fn distance(mut self, distance: f32) -> Self {
        self.distance = distance.clamp(self.min_distance, self.max_distance);
        self
    }

    pub fn fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn distance_limits(mut self, min: f32, max: f32) -> Self {
        self.min_distance = min;
        self.max_distance = max;
        self.distance = self.distance.clamp(min, max);
        self
    }

    /// Place the camera at `position` looking at `target`.
    pub fn looking_from(mut self, position: Vec3, target: Vec3) -> Self {
        self.target = target;
        let offset = position - target;
        self.distance = offset.length().clamp(self.min_distance, self.max_distance);

        let (x_axis, y_axis) = self.ground_axes();
        let dir = offset.normalize_or(self.up);
        self.polar = dir
            .dot(self.up)
            .clamp(-1.0, 1.0)
            .acos()
            .clamp(MIN_POLAR, self.max_polar);
        let ground = Vec2::new(dir.dot(x_axis), dir.dot(y_axis));
        if ground.length_squared() > f32::EPSILON {
            self.azimuth = ground.y.atan2(ground.x);
        }
        self
    }

    /// Apply this frame's input. `viewport` is the surface size in pixels.
    pub fn update(&mut self, input: &Input, viewport: Vec2) {
        if !self.enabled {
            return;
        }

        let delta = input.cursor_delta();
        if input.mouse_down(MouseButton::Left) && delta != Vec2::ZERO {
            self.pan(delta, viewport.y.max(1.0));
        }
        if input.mouse_down(MouseButton::Right) && delta != Vec2::ZERO {
            self.azimuth -= delta.x * self.rotate_sensitivity;
            self.polar = (self.polar - delta.y * self.rotate_sensitivity).clamp(MIN_POLAR, self.max_polar);
        }

        let scroll = input.scroll_delta().y;
        if scroll != 0.0 {
            self.distance =
                (self.distance * self.zoom_factor.powf(scroll)).clamp(self.min_distance, self.max_distance);
        }
    }

    /// Move the target so the ground follows a cursor drag of `delta` pixels.
    fn pan(&mut self, delta: Vec2, viewport_height: f32) {
        let world_per_pixel = 2.0 * self.distance * (self.fov * 0.5).tan() / viewport_height;
        let camera = self.camera();
        let right = camera.forward().cross(self.up).normalize_or_zero();
        let ahead = self.up.cross(right);
        self.target += (-right * delta.x + ahead * delta.y) * world_per_pixel;
    }

    /// Two axes spanning the ground plane, with azimuth 0 along the first.
    fn ground_axes(&self) -> (Vec3, Vec3) {
        let rotation = Quat::from_rotation_arc(Vec3::Z, self.up);
        (rotation * Vec3::X, rotation * Vec3::Y)
    }

    pub fn camera(&self) -> Camera {
        let (x_axis, y_axis) = self.ground_axes();
        let ground = x_axis * self.azimuth.cos() + y_axis * self.azimuth.sin();
        let dir = self.up * self.polar.cos() + ground * self.polar.sin();

        Camera {
            position: self.target + dir * self.distance,
            target: self.target,
            up: self.up,
            fov: self.fov,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_from_round_trips() {
        let position = Vec3::new(10.0, -5.0, 20.0);
        let target = Vec3::new(2.0, 3.0, 0.0);
        let camera = MapControls::new()
            .looking_from(position, target)
            .camera();
        assert!(camera.position.abs_diff_eq(position, 1e-3));
        assert_eq!(camera.target, target);
    }

    #[test]
    fn primary_drag_pans_on_the_ground() {
        let mut controls = MapControls::new().looking_from(Vec3::new(0.0, -20.0, 20.0), Vec3::ZERO);
        let mut input = Input::new();
        input.move_cursor(Vec2::new(100.0, 100.0));
        input.press_button(MouseButton::Left);
        input.move_cursor(Vec2::new(150.0, 100.0));

        controls.update(&input, Vec2::new(800.0, 600.0));
        assert!(controls.target.x < 0.0);
        assert!(controls.target.z.abs() < 1e-5);
    }

    #[test]
    fn disabled_controls_ignore_input() {
        let mut controls = MapControls::new();
        let before = controls.camera();
        let mut input = Input::new();
        input.move_cursor(Vec2::ZERO);
        input.press_button(MouseButton::Right);
        input.move_cursor(Vec2::new(40.0, 40.0));
        input.scroll(Vec2::new(0.0, 3.0));

        controls.enabled = false;
        controls.update(&input, Vec2::new(800.0, 600.0));
        assert_eq!(controls.camera(), before);

        controls.enabled = true;
        controls.update(&input, Vec2::new(800.0, 600.0));
        assert!(controls.distance < 30.0);
        assert_ne!(controls.camera(), before);
    }

    #[test]
    fn zoom_respects_limits() {
        let mut controls = MapControls::new().distance_limits(5.0, 10.0);
        let mut input = Input::new();
        input.scroll(Vec2::new(0.0, 100.0));
        controls.update(&input, Vec2::new(800.0, 600.0));
        assert_eq!(controls.distance, 5.0);
    }
}
