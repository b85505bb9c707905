//! Host-owned handles the tracker writes into.

use glam::{Mat4, Quat, Vec3};

/// Destination of a composed world transform.
pub trait TransformTarget {
    /// Replace the world transform.
    fn set_world_matrix(&mut self, world: Mat4);

    /// Show or hide the target. Targets without a visibility notion ignore it.
    fn set_visible(&mut self, _visible: bool) {}
}

impl TransformTarget for Mat4 {
    fn set_world_matrix(&mut self, world: Mat4) {
        *self = world;
    }
}

/// Decomposed transform, the usual scene-graph node representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// World position.
    pub translation: Vec3,
    /// World orientation.
    pub rotation: Quat,
    /// Per-axis scale; negative components come from axis inversions.
    pub scale: Vec3,
    /// Whether the node is shown.
    pub visible: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: true,
        }
    }
}

impl Transform {
    /// Recompose the world matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl TransformTarget for Transform {
    fn set_world_matrix(&mut self, world: Mat4) {
        let (scale, rotation, translation) = world.to_scale_rotation_translation();
        self.scale = scale;
        self.rotation = rotation;
        self.translation = translation;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}
