//! Per-frame 2D-3D correspondence sets.

use crate::error::TrackingError;
use fiducial_pnp::MIN_CORRESPONDENCES;
use glam::{DVec2, DVec3};

/// Corners of a square marker of side `length`, centred on the origin in the
/// `z = 0` plane: top-left, top-right, bottom-right, bottom-left.
pub fn square_marker_points(length: f64) -> [DVec3; 4] {
    let h = length / 2.0;
    [
        DVec3::new(-h, h, 0.0),
        DVec3::new(h, h, 0.0),
        DVec3::new(h, -h, 0.0),
        DVec3::new(-h, -h, 0.0),
    ]
}

/// Object points and their observed pixels, index aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    /// Object-space points.
    pub object: Vec<DVec3>,
    /// Pixel-space observations.
    pub image: Vec<DVec2>,
}

impl Correspondences {
    /// Pair object points with image points. Call [`validate`](Self::validate)
    /// before solving.
    pub fn new(object: Vec<DVec3>, image: Vec<DVec2>) -> Self {
        Self { object, image }
    }

    /// Correspondences of a detected square marker, corners in the order of
    /// [`square_marker_points`].
    pub fn square_marker(length: f64, corners: [DVec2; 4]) -> Self {
        Self {
            object: square_marker_points(length).to_vec(),
            image: corners.to_vec(),
        }
    }

    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.object.len()
    }

    /// Whether there are no correspondences.
    pub fn is_empty(&self) -> bool {
        self.object.is_empty()
    }

    /// Check that the set can determine a pose.
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.object.len() != self.image.len() {
            return Err(TrackingError::InvalidConfiguration(format!(
                "{} object points but {} image points",
                self.object.len(),
                self.image.len()
            )));
        }
        if self.object.len() < MIN_CORRESPONDENCES {
            return Err(TrackingError::InvalidConfiguration(format!(
                "at least {MIN_CORRESPONDENCES} correspondences are required, got {}",
                self.object.len()
            )));
        }
        Ok(())
    }

    /// Object points with `y` negated, for models authored left-handed.
    pub fn left_handed_object_points(&self) -> Vec<DVec3> {
        self.object
            .iter()
            .map(|p| DVec3::new(p.x, -p.y, p.z))
            .collect()
    }
}
