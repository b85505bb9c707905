//! Clip-space sanity check for solved poses.

use crate::error::TrackingError;
use fiducial_pnp::{CameraModel, RawPose};
use glam::{DMat4, DVec3, DVec4};

/// Accepts a pose only if its origin projects inside the view volume.
///
/// The solver's camera looks down `+Z` while the projection expects `-Z`,
/// hence the fixed depth inversion in front of the projection matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportGate {
    clip_from_camera: DMat4,
    near: f64,
    far: f64,
}

impl ViewportGate {
    /// Build a gate for `camera` with the given clip distances.
    pub fn new(camera: &CameraModel, near: f64, far: f64) -> Result<Self, TrackingError> {
        let projection = camera.projection_matrix(near, far)?;
        Ok(Self {
            clip_from_camera: projection * DMat4::from_scale(DVec3::new(1.0, 1.0, -1.0)),
            near,
            far,
        })
    }

    /// Near clip distance.
    pub fn near(&self) -> f64 {
        self.near
    }

    /// Far clip distance.
    pub fn far(&self) -> f64 {
        self.far
    }

    /// Normalized device coordinates of the pose origin, `None` when the
    /// homogeneous divisor is zero or any pose component is not finite.
    pub fn ndc(&self, raw: &RawPose) -> Option<DVec3> {
        if !raw.is_finite() {
            return None;
        }
        let clip = self.clip_from_camera * DVec4::new(raw.tvec.x, raw.tvec.y, raw.tvec.z, 1.0);
        if clip.w == 0.0 {
            return None;
        }
        Some(clip.truncate() / clip.w)
    }

    /// Whether the pose origin lies in `x, y ∈ [-1, 1]`, `z ∈ [0, 1]`.
    pub fn is_trustworthy(&self, raw: &RawPose) -> bool {
        match self.ndc(raw) {
            Some(ndc) => {
                (-1.0..=1.0).contains(&ndc.x)
                    && (-1.0..=1.0).contains(&ndc.y)
                    && (0.0..=1.0).contains(&ndc.z)
            }
            None => false,
        }
    }
}

/// One-shot form of [`ViewportGate::is_trustworthy`].
///
/// Invalid clip planes make every pose untrustworthy.
pub fn is_trustworthy(raw: &RawPose, camera: &CameraModel, near: f64, far: f64) -> bool {
    ViewportGate::new(camera, near, far)
        .map(|gate| gate.is_trustworthy(raw))
        .unwrap_or(false)
}
