//! Solver pose to engine pose.
//!
//! The solver reports poses in the camera frame with `x` right, `y` down and
//! `z` forward. The engine convention keeps `x` right and `z` forward but has
//! `y` up, so the conversion conjugates by `diag(1, -1, 1)`: the translation
//! flips `y` and the rotation axis, being a pseudo-vector, flips `x` and `z`.

use fiducial_pnp::RawPose;
use glam::{DQuat, DVec3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Pose in the engine convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseData {
    /// Position of the object origin relative to the camera.
    pub position: Vec3,
    /// Unit rotation quaternion.
    pub rotation: Quat,
}

impl Default for PoseData {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl PoseData {
    /// Create a pose, normalizing the rotation.
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation: rotation.normalize(),
        }
    }
}

/// Convert a raw solver pose into the engine convention.
///
/// Pure function of its input: identical raw poses yield identical bits.
pub fn pose_from_raw(raw: &RawPose) -> PoseData {
    let t = raw.tvec;
    let r = raw.rvec;

    let axis_angle = DVec3::new(-r.x, r.y, -r.z);
    let q = DQuat::from_scaled_axis(axis_angle).normalize();

    PoseData {
        position: Vec3::new(t.x as f32, -t.y as f32, t.z as f32),
        rotation: Quat::from_xyzw(q.x as f32, q.y as f32, q.z as f32, q.w as f32).normalize(),
    }
}
