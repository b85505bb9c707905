//! Common data types shared across Perspective-n-Point (PnP) solvers.

use crate::camera::CameraError;
use glam::{DMat3, DQuat, DVec3};
use thiserror::Error;

/// Minimum number of correspondences for a determinate pose.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Error types for PnP solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// Iterative refinement was requested without an initial guess.
    #[error("Iterative PnP requires an initial pose guess")]
    MissingSeed,

    /// The geometry does not determine a unique pose.
    #[error("Degenerate point configuration: {0}")]
    DegenerateConfiguration(String),

    /// Singular value decomposition failed
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// Camera model error
    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl PnPError {
    /// Whether the error comes from the geometry of the input rather than
    /// from malformed input. Degenerate solves may succeed with another method.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            PnPError::DegenerateConfiguration(_) | PnPError::SvdFailed(_)
        )
    }
}

/// Numeric tolerances used by linear algebra routines throughout the PnP pipeline.
#[derive(Debug, Clone)]
pub struct NumericTol {
    /// Tolerance for singular-value decomposition solves.
    pub svd: f64,
    /// Relative eigenvalue below which the object points are considered collinear.
    pub collinear: f64,
    /// Relative eigenvalue below which the object points are considered planar.
    pub planar: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            collinear: 1e-10,
            planar: 1e-8,
        }
    }
}

/// Pose in the solver convention: a Rodrigues rotation vector and a
/// translation mapping object coordinates into the camera frame
/// (`x` right, `y` down, `z` forward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    /// Axis-angle rotation, radians.
    pub rvec: DVec3,
    /// Translation of the object origin in camera coordinates.
    pub tvec: DVec3,
}

impl RawPose {
    /// Create a raw pose from a rotation vector and translation.
    pub fn new(rvec: DVec3, tvec: DVec3) -> Self {
        Self { rvec, tvec }
    }

    /// Build a raw pose from a rotation matrix and translation.
    pub fn from_rotation_translation(rotation: DMat3, tvec: DVec3) -> Self {
        let mut q = DQuat::from_mat3(&rotation).normalize();
        // keep the rotation angle in [0, pi]
        if q.w < 0.0 {
            q = -q;
        }
        Self {
            rvec: q.to_scaled_axis(),
            tvec,
        }
    }

    /// Rotation matrix of the pose (object to camera).
    pub fn rotation_matrix(&self) -> DMat3 {
        DMat3::from_quat(DQuat::from_scaled_axis(self.rvec))
    }

    /// Map an object-frame point into the camera frame.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation_matrix() * point + self.tvec
    }

    /// Whether every component is finite.
    pub fn is_finite(&self) -> bool {
        self.rvec.is_finite() && self.tvec.is_finite()
    }
}

/// Result returned by any PnP solver.
#[derive(Debug, Clone)]
pub struct PnPSolution {
    /// Estimated pose, object to camera.
    pub pose: RawPose,
    /// Root-mean-square reprojection error in pixels (if computed).
    pub reproj_rmse: Option<f64>,
    /// Number of iterations taken (if applicable).
    pub num_iterations: Option<usize>,
    /// Whether the solver converged (if applicable).
    pub converged: Option<bool>,
}
