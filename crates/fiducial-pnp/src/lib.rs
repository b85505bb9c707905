#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Fiducial PnP (Perspective-n-Point)
//!
//! Camera pose estimation from 2D-3D point correspondences.
//!
//! ## Key Features
//!
//! - **Camera model**: pinhole intrinsics with up to 14 distortion coefficients
//! - **Robust solve**: homography decomposition for planar targets, EPnP otherwise
//! - **Iterative solve**: Levenberg–Marquardt refinement from a prior pose
//! - **Solver contract**: [`PoseSolver`] lets callers plug their own backend
//!
//! ## Example: square marker
//!
//! ```rust
//! use fiducial_pnp::{solve_pnp, CameraModel, SolveMethod};
//! use glam::{DVec2, DVec3};
//!
//! let camera = CameraModel::derive_default(640, 480)?;
//!
//! // Marker corners, 10 cm side, in marker coordinates.
//! let world = vec![
//!     DVec3::new(-0.05, 0.05, 0.0),
//!     DVec3::new(0.05, 0.05, 0.0),
//!     DVec3::new(0.05, -0.05, 0.0),
//!     DVec3::new(-0.05, -0.05, 0.0),
//! ];
//!
//! // Detected corners, marker facing the camera 1 m away.
//! let image = vec![
//!     DVec2::new(288.0, 272.0),
//!     DVec2::new(352.0, 272.0),
//!     DVec2::new(352.0, 208.0),
//!     DVec2::new(288.0, 208.0),
//! ];
//!
//! let solution = solve_pnp(&world, &image, &camera, None, SolveMethod::Robust)?;
//! assert!((solution.pose.tvec.z - 1.0).abs() < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Camera intrinsics, lens distortion and projection helpers.
pub mod camera;

/// Efficient Perspective-n-Point (EPnP) solver implementation.
///
/// Closed-form pose for non-planar point sets.
pub mod epnp;

/// Homography-based pose for planar targets.
pub mod planar;

/// Levenberg–Marquardt pose refinement.
pub mod refine;

/// Solver contract and method dispatch.
pub mod solver;

/// Common data types shared by the solvers.
pub mod types;

mod ops;

pub use camera::{CameraError, CameraIntrinsics, CameraModel, Distortion, ImageSize};
pub use epnp::{EPnP, EPnPParams};
pub use planar::PlanarHomography;
pub use refine::{refine_pose_lm, LMParams};
pub use solver::{solve_pnp, DefaultPoseSolver, PoseSolver, RobustParams, SolveMethod};
pub use types::{NumericTol, PnPError, PnPSolution, RawPose, MIN_CORRESPONDENCES};
