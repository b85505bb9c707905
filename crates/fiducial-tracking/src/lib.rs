#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Fiducial tracking
//!
//! Turns per-frame 2D-3D correspondences into stable world transforms:
//! seeded solving, a clip-space sanity gate, per-identity temporal filtering
//! and composition with a known camera or object transform.
//!
//! ## Example
//!
//! ```rust
//! use fiducial_pnp::CameraModel;
//! use fiducial_tracking::{Correspondences, PoseTracker, TrackerConfig};
//! use glam::{DVec2, Mat4};
//!
//! let camera = CameraModel::derive_default(640, 480)?;
//! let mut tracker: PoseTracker<u32, Mat4> = PoseTracker::new(camera, TrackerConfig::default())?;
//! tracker.register(7, Mat4::IDENTITY);
//!
//! // A 10 cm marker facing the camera 1 m away.
//! let corners = [
//!     DVec2::new(288.0, 272.0),
//!     DVec2::new(352.0, 272.0),
//!     DVec2::new(352.0, 208.0),
//!     DVec2::new(288.0, 208.0),
//! ];
//! let report = tracker.process_frame(
//!     Mat4::IDENTITY,
//!     [(7, Correspondences::square_marker(0.1, corners))],
//! );
//!
//! let update = report.outcomes[0].1.update().expect("marker in view");
//! assert!((update.pose.position.z - 1.0).abs() < 1e-4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// World transform composition and axis inversion.
pub mod compose;

/// Tracker and camera settings.
pub mod config;

/// Solver pose to engine pose conversion.
pub mod convert;

/// Correspondence sets and the canonical square marker.
pub mod correspondences;

mod error;

/// Temporal pose filtering.
pub mod filter;

/// Clip-space gate for solved poses.
pub mod gate;

/// Per-identity state.
pub mod registry;

/// Host transform handles.
pub mod target;

/// Frame driver.
pub mod tracker;

pub use compose::{apply_axis_inversions, compose, local_matrix, AnchorMode, AxisInversion};
pub use config::{CameraConfig, LossPolicy, TrackerConfig};
pub use convert::{pose_from_raw, PoseData};
pub use correspondences::{square_marker_points, Correspondences};
pub use error::TrackingError;
pub use filter::{FilterMode, FilterState};
pub use gate::{is_trustworthy, ViewportGate};
pub use registry::{ObservedFrame, TrackedEntity, TrackedEntityRegistry};
pub use target::{Transform, TransformTarget};
pub use tracker::{FrameReport, PoseTracker, SkipReason, TrackOutcome, TrackUpdate};
