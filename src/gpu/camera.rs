//! Orbit camera supplying the view and projection transforms.

use glam::{Mat4, Vec3};

/// Orbit camera around a target point.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    /// Horizontal rotation angle in radians.
    pub yaw: f32,
    /// Vertical rotation angle in radians.
    pub pitch: f32,
    /// Distance from the target point.
    pub distance: f32,
    /// Point the camera orbits around.
    pub target: Vec3,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Track the particle center of mass instead of a fixed target.
    pub follow_center_of_mass: bool,
}

impl Camera {
    const PITCH_LIMIT: f32 = 1.5;

    pub fn new() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.3,
            distance: 12.0,
            target: Vec3::ZERO,
            fov_y: 45.0_f32.to_radians(),
            near: 0.05,
            far: 500.0,
            follow_center_of_mass: false,
        }
    }

    /// The camera's world position.
    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.pitch.cos() * self.yaw.sin();
        let y = self.distance * self.pitch.sin();
        let z = self.distance * self.pitch.cos() * self.yaw.cos();
        self.target + Vec3::new(x, y, z)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect.max(1e-3), self.near, self.far)
    }

    /// Rotate by a mouse drag, in radians.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw -= delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    /// Scale the orbit distance; positive `amount` moves closer.
    pub fn zoom(&mut self, amount: f32) {
        self.distance = (self.distance * (1.0 - amount * 0.1)).clamp(self.near * 4.0, self.far * 0.5);
    }

    /// Retarget on `center` when following is enabled.
    pub fn follow(&mut self, center: Option<Vec3>) {
        if let (true, Some(center)) = (self.follow_center_of_mass, center) {
            self.target = center;
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}
