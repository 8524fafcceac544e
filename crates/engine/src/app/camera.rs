use thiserror::Error;

use super::math::{normalize_degrees, shortest_angle_delta_degrees, Vec2, Vec3};
use super::rendering::Viewport;

pub const CAMERA_CLOSENESS_DEFAULT: f32 = 0.15;
pub const CAMERA_ZOOM_DEFAULT: f32 = 1.0;
pub const CAMERA_ZOOM_MIN: f32 = 0.25;
pub const CAMERA_ZOOM_MAX: f32 = 4.0;
pub const CAMERA_ZOOM_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CameraError {
    #[error("camera closeness must be within [0, 1], got {value}")]
    ClosenessOutOfRange { value: f32 },
    #[error("camera zoom must be non-negative, got {value}")]
    NegativeZoom { value: f32 },
}

/// Smoothed viewpoint. Position and rotation chase their targets by the
/// closeness factor each tick; `reset_to` is the only hard set.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    position: Vec3,
    rotation_degrees: f32,
    zoom: f32,
    closeness: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation_degrees: 0.0,
            zoom: CAMERA_ZOOM_DEFAULT,
            closeness: CAMERA_CLOSENESS_DEFAULT,
        }
    }
}

impl Camera {
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation_degrees(&self) -> f32 {
        self.rotation_degrees
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn closeness(&self) -> f32 {
        self.closeness
    }

    pub fn set_closeness(&mut self, closeness: f32) -> Result<(), CameraError> {
        if !(0.0..=1.0).contains(&closeness) || !closeness.is_finite() {
            return Err(CameraError::ClosenessOutOfRange { value: closeness });
        }
        self.closeness = closeness;
        Ok(())
    }

    pub fn set_zoom(&mut self, zoom: f32) -> Result<(), CameraError> {
        if zoom < 0.0 || !zoom.is_finite() {
            return Err(CameraError::NegativeZoom { value: zoom });
        }
        self.zoom = zoom;
        Ok(())
    }

    pub fn apply_zoom_steps(&mut self, steps: i32) {
        if steps == 0 {
            return;
        }
        let target = self.zoom + steps as f32 * CAMERA_ZOOM_STEP;
        self.zoom = target.clamp(CAMERA_ZOOM_MIN, CAMERA_ZOOM_MAX);
    }

    /// Moves the camera a closeness-sized fraction of the way to `target`.
    pub fn target_position(&mut self, target: Vec3) {
        self.position += (target - self.position) * self.closeness;
    }

    /// Rotates a closeness-sized fraction of the shortest arc toward
    /// `target_degrees`, wrapping at the half turn.
    pub fn target_rotation(&mut self, target_degrees: f32) {
        let delta = shortest_angle_delta_degrees(self.rotation_degrees, target_degrees);
        self.rotation_degrees = normalize_degrees(self.rotation_degrees + delta * self.closeness);
    }

    /// Hard-sets every field, bypassing smoothing. Scene initialization only.
    pub fn reset_to(&mut self, position: Vec3, rotation_degrees: f32, zoom: f32) {
        self.position = position;
        self.rotation_degrees = normalize_degrees(rotation_degrees);
        self.zoom = zoom.max(0.0);
    }
}

/// Projects a world point to screen pixels: translate by the camera
/// position, scale by zoom, rotate by the negative camera rotation, then
/// lift by height. Screen-to-world inverts this ordering exactly, so the
/// two must change together.
pub fn world_to_screen_px(camera: &Camera, viewport: Viewport, world: Vec3) -> (i32, i32) {
    let zoom = camera.zoom();
    let dx = (world.x - camera.position().x) * zoom;
    let dy = (world.y - camera.position().y) * zoom;
    let theta = -camera.rotation_degrees().to_radians();
    let (sin, cos) = theta.sin_cos();
    let rx = dx * cos - dy * sin;
    let ry = dx * sin + dy * cos;
    let height_px = (world.z - camera.position().z) * zoom;
    let sx = viewport.width as f32 * 0.5 + rx;
    let sy = viewport.height as f32 * 0.5 - ry - height_px;
    (sx.round() as i32, sy.round() as i32)
}

/// Inverse of [`world_to_screen_px`] for points on the ground plane
/// (z = 0). `None` when zoom is degenerate.
pub fn screen_to_world_px(camera: &Camera, viewport: Viewport, screen: Vec2) -> Option<Vec3> {
    let zoom = camera.zoom();
    if zoom <= 0.0 {
        return None;
    }
    let rx = screen.x - viewport.width as f32 * 0.5;
    let ry = viewport.height as f32 * 0.5 - screen.y - camera.position().z * zoom;
    let theta = camera.rotation_degrees().to_radians();
    let (sin, cos) = theta.sin_cos();
    let dx = rx * cos - ry * sin;
    let dy = rx * sin + ry * cos;
    Some(Vec3::new(
        dx / zoom + camera.position().x,
        dy / zoom + camera.position().y,
        0.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Viewport = Viewport {
        width: 800,
        height: 600,
    };

    #[test]
    fn closeness_outside_unit_interval_is_rejected() {
        let mut camera = Camera::default();
        assert!(camera.set_closeness(-0.01).is_err());
        assert!(camera.set_closeness(1.01).is_err());
        assert!(camera.set_closeness(f32::NAN).is_err());
        assert!(camera.set_closeness(0.0).is_ok());
        assert!(camera.set_closeness(1.0).is_ok());
    }

    #[test]
    fn negative_zoom_is_rejected() {
        let mut camera = Camera::default();
        assert!(camera.set_zoom(-0.5).is_err());
        assert!(camera.set_zoom(0.0).is_ok());
        assert!(camera.set_zoom(2.5).is_ok());
    }

    #[test]
    fn target_position_converges_without_overshoot() {
        let mut camera = Camera::default();
        camera.set_closeness(0.25).expect("valid closeness");
        let target = Vec3::new(10.0, -4.0, 0.0);

        let mut last_distance = (target - camera.position()).length();
        for _ in 0..200 {
            camera.target_position(target);
            let distance = (target - camera.position()).length();
            assert!(distance <= last_distance + 1e-6);
            last_distance = distance;
        }
        assert!(last_distance < 1e-3);
    }

    #[test]
    fn target_rotation_takes_shortest_arc_across_zero() {
        let mut camera = Camera::default();
        camera.set_closeness(0.5).expect("valid closeness");
        camera.reset_to(Vec3::ZERO, 350.0, 1.0);

        camera.target_rotation(10.0);
        // Half of the +20 degree shortest arc, renormalized past 360.
        assert!((camera.rotation_degrees() - 0.0).abs() < 1e-4);

        for _ in 0..60 {
            camera.target_rotation(10.0);
        }
        assert!((camera.rotation_degrees() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn reset_to_bypasses_smoothing() {
        let mut camera = Camera::default();
        camera.set_closeness(0.01).expect("valid closeness");
        camera.reset_to(Vec3::new(5.0, 6.0, 1.0), 400.0, 2.0);
        assert_eq!(camera.position(), Vec3::new(5.0, 6.0, 1.0));
        assert!((camera.rotation_degrees() - 40.0).abs() < 1e-4);
        assert_eq!(camera.zoom(), 2.0);
    }

    #[test]
    fn camera_origin_maps_to_viewport_center() {
        let camera = Camera::default();
        let (x, y) = world_to_screen_px(&camera, VIEWPORT, Vec3::ZERO);
        assert_eq!((x, y), (400, 300));
    }

    #[test]
    fn height_lifts_points_up_the_screen() {
        let camera = Camera::default();
        let (_, grounded_y) = world_to_screen_px(&camera, VIEWPORT, Vec3::ZERO);
        let (_, raised_y) = world_to_screen_px(&camera, VIEWPORT, Vec3::new(0.0, 0.0, 10.0));
        assert!(raised_y < grounded_y);
    }

    #[test]
    fn quarter_turn_swaps_screen_axes() {
        let mut camera = Camera::default();
        camera.reset_to(Vec3::ZERO, 90.0, 1.0);
        // A point east of the camera lands below center once the screen has
        // rotated opposite to the camera.
        let (x, y) = world_to_screen_px(&camera, VIEWPORT, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(x, 400);
        assert_eq!(y, 310);
    }

    #[test]
    fn screen_to_world_inverts_projection_on_ground_plane() {
        let mut camera = Camera::default();
        camera.reset_to(Vec3::new(3.0, -2.0, 0.0), 37.0, 1.5);
        let world = Vec3::new(7.25, 4.5, 0.0);
        let (sx, sy) = world_to_screen_px(&camera, VIEWPORT, world);
        let round_trip = screen_to_world_px(&camera, VIEWPORT, Vec2::new(sx as f32, sy as f32))
            .expect("non-degenerate zoom");
        assert!((round_trip.x - world.x).abs() < 1.0);
        assert!((round_trip.y - world.y).abs() < 1.0);
    }

    #[test]
    fn screen_to_world_rejects_zero_zoom() {
        let mut camera = Camera::default();
        camera.set_zoom(0.0).expect("zero zoom is a valid set");
        assert!(screen_to_world_px(&camera, VIEWPORT, Vec2::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn apply_zoom_steps_clamps_at_bounds() {
        let mut camera = Camera::default();
        camera.apply_zoom_steps(500);
        assert!((camera.zoom() - CAMERA_ZOOM_MAX).abs() < 1e-4);
        camera.apply_zoom_steps(-1000);
        assert!((camera.zoom() - CAMERA_ZOOM_MIN).abs() < 1e-4);
    }
}
