//! Host-supplied settings, loadable from JSON.

use crate::compose::{AnchorMode, AxisInversion};
use crate::error::TrackingError;
use crate::filter::FilterMode;
use fiducial_pnp::{CameraIntrinsics, CameraModel, Distortion, ImageSize};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What happens to identities missing from a frame's observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LossPolicy {
    /// Leave the target at its last transform.
    #[default]
    Retain,
    /// Hide the target and reset its state after `after_frames` consecutive absences.
    Hide {
        /// Absent frames tolerated before hiding, at least one.
        after_frames: u32,
    },
}

/// Tracker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Near clip distance of the viewport gate.
    pub near_clip: f64,
    /// Far clip distance of the viewport gate.
    pub far_clip: f64,
    /// Temporal filter.
    pub filter: FilterMode,
    /// Mirroring applied to the local pose.
    pub axis_inversion: AxisInversion,
    /// Which participant is positioned.
    pub anchor: AnchorMode,
    /// Handling of identities absent from a frame.
    pub loss_policy: LossPolicy,
    /// Negate `y` of every object point before solving.
    pub left_handed_object_points: bool,
    /// Start tracking identities that were never registered.
    pub auto_register: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            near_clip: 0.01,
            far_clip: 1000.0,
            filter: FilterMode::default(),
            axis_inversion: AxisInversion::default(),
            anchor: AnchorMode::default(),
            loss_policy: LossPolicy::default(),
            left_handed_object_points: false,
            auto_register: false,
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, TrackingError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), TrackingError> {
        let (near, far) = (self.near_clip, self.far_clip);
        if !(near.is_finite() && far.is_finite()) || near <= 0.0 || far <= near {
            return Err(TrackingError::InvalidConfiguration(format!(
                "clip planes must satisfy 0 < near < far, got near {near}, far {far}"
            )));
        }
        if !self.filter.is_valid() {
            return Err(TrackingError::InvalidConfiguration(format!(
                "filter parameters out of range: {:?}",
                self.filter
            )));
        }
        if let LossPolicy::Hide { after_frames: 0 } = self.loss_policy {
            return Err(TrackingError::InvalidConfiguration(
                "loss policy must tolerate at least one absent frame".to_string(),
            ));
        }
        Ok(())
    }
}

/// Camera settings: explicit calibration or just the image size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Calibrated intrinsics; derived from the image size when absent.
    #[serde(default)]
    pub intrinsics: Option<CameraIntrinsics>,
    /// Distortion coefficients in OpenCV order.
    #[serde(default)]
    pub distortion: Vec<f64>,
    /// Integer factor the detection image is downscaled by.
    #[serde(default = "default_downscale")]
    pub downscale: u32,
}

fn default_downscale() -> u32 {
    1
}

impl CameraConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, TrackingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        read_json(path.as_ref())
    }

    /// Build the camera model.
    pub fn build(&self) -> Result<CameraModel, TrackingError> {
        let model = match self.intrinsics {
            Some(intrinsics) => CameraModel::new(
                intrinsics,
                Distortion::new(&self.distortion)?,
                ImageSize {
                    width: self.width,
                    height: self.height,
                },
            )?,
            None => {
                if self.distortion.iter().any(|&c| c != 0.0) {
                    return Err(TrackingError::InvalidConfiguration(
                        "distortion requires calibrated intrinsics".to_string(),
                    ));
                }
                CameraModel::derive_default(self.width, self.height)?
            }
        };
        if self.downscale == 1 {
            Ok(model)
        } else {
            Ok(model.downscaled(self.downscale)?)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TrackingError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
