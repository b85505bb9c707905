//! Temporal smoothing of converted poses.

use crate::convert::PoseData;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// How consecutive samples of one identity are blended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FilterMode {
    /// Samples pass through unchanged.
    Disabled,
    /// `lerp(new, previous, position)` and `slerp(new, previous, rotation)`.
    ///
    /// Coefficients lie in `[0, 1]`; larger values weigh the previous output
    /// more, `0` passes samples through and `1` freezes the output.
    Exponential {
        /// Position coefficient.
        position: f32,
        /// Rotation coefficient.
        rotation: f32,
    },
    /// Dead band: a component keeps its previous value until the new sample
    /// moves at least the threshold away from it.
    Threshold {
        /// Minimum Euclidean displacement.
        position: f32,
        /// Minimum rotation angle in degrees.
        rotation_degrees: f32,
    },
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::Exponential {
            position: 0.5,
            rotation: 0.5,
        }
    }
}

impl FilterMode {
    /// Whether the coefficients or thresholds are in range.
    pub fn is_valid(&self) -> bool {
        let unit = |c: f32| (0.0..=1.0).contains(&c);
        match *self {
            FilterMode::Disabled => true,
            FilterMode::Exponential { position, rotation } => unit(position) && unit(rotation),
            FilterMode::Threshold {
                position,
                rotation_degrees,
            } => position >= 0.0 && (0.0..=180.0).contains(&rotation_degrees),
        }
    }
}

/// Previous output of one identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    previous: Option<PoseData>,
}

impl FilterState {
    /// Empty state: the next sample is returned as is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a previous output is stored.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// The previous output, if any.
    pub fn previous(&self) -> Option<&PoseData> {
        self.previous.as_ref()
    }

    /// Forget the previous output.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Blend `sample` with the previous output, store and return the result.
    ///
    /// The first sample after construction or [`reset`](Self::reset) is
    /// returned unfiltered regardless of `mode`.
    pub fn update(&mut self, sample: PoseData, mode: &FilterMode) -> PoseData {
        let out = match self.previous {
            None => sample,
            Some(prev) => blend(sample, prev, mode),
        };
        self.previous = Some(out);
        out
    }
}

fn blend(new: PoseData, prev: PoseData, mode: &FilterMode) -> PoseData {
    match *mode {
        FilterMode::Disabled => new,
        FilterMode::Exponential { position, rotation } => PoseData {
            position: lerp_toward_previous(new.position, prev.position, position),
            rotation: slerp_toward_previous(new.rotation, prev.rotation, rotation),
        },
        FilterMode::Threshold {
            position,
            rotation_degrees,
        } => {
            let position = if new.position.distance(prev.position) < position {
                prev.position
            } else {
                new.position
            };
            let rotation = if new.rotation.angle_between(prev.rotation).to_degrees() < rotation_degrees {
                prev.rotation
            } else {
                new.rotation
            };
            PoseData { position, rotation }
        }
    }
}

// Weighted so that the endpoints are exact: t = 0 yields `new`, t = 1 yields `prev`.
fn lerp_toward_previous(new: Vec3, prev: Vec3, t: f32) -> Vec3 {
    new * (1.0 - t) + prev * t
}

fn slerp_toward_previous(new: Quat, prev: Quat, t: f32) -> Quat {
    if t <= 0.0 {
        new
    } else if t >= 1.0 {
        prev
    } else {
        new.slerp(prev, t).normalize()
    }
}
