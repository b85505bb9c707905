//! Composition of a camera-relative pose into a world transform.

use crate::convert::PoseData;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Per-axis mirroring applied to the local pose matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisInversion {
    /// Mirror the X axis.
    pub x: bool,
    /// Mirror the Y axis.
    pub y: bool,
    /// Mirror the Z axis.
    pub z: bool,
}

impl AxisInversion {
    /// No inversion.
    pub const NONE: Self = Self {
        x: false,
        y: false,
        z: false,
    };

    /// Whether any axis is inverted.
    pub fn any(&self) -> bool {
        self.x || self.y || self.z
    }
}

/// Which participant's world transform is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorMode {
    /// The camera is placed relative to a known object.
    RelativeToCameraTarget,
    /// The object is placed relative to a known camera.
    #[default]
    RelativeToObjectTarget,
}

/// Local transform of the object in the camera frame, unit scale.
pub fn local_matrix(pose: &PoseData) -> Mat4 {
    Mat4::from_rotation_translation(pose.rotation, pose.position)
}

/// Post-multiply the requested mirror matrices, X first, then Y, then Z.
pub fn apply_axis_inversions(matrix: Mat4, inversions: AxisInversion) -> Mat4 {
    let mut m = matrix;
    if inversions.x {
        m *= Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0));
    }
    if inversions.y {
        m *= Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));
    }
    if inversions.z {
        m *= Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0));
    }
    m
}

/// World matrix of the participant being solved for.
///
/// - [`AnchorMode::RelativeToCameraTarget`]: `object_world * local⁻¹`, the camera's world matrix.
/// - [`AnchorMode::RelativeToObjectTarget`]: `camera_world * local`, the object's world matrix.
pub fn compose(
    pose: &PoseData,
    inversions: AxisInversion,
    anchor: AnchorMode,
    camera_world: Mat4,
    object_world: Mat4,
) -> Mat4 {
    let local = apply_axis_inversions(local_matrix(pose), inversions);
    match anchor {
        AnchorMode::RelativeToCameraTarget => object_world * local.inverse(),
        AnchorMode::RelativeToObjectTarget => camera_world * local,
    }
}
