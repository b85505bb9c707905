use fiducial_pnp::{CameraError, PnPError};
use thiserror::Error;

/// Errors surfaced by the tracking layer.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Malformed camera, correspondences or settings. Detected before solving.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The solver could not produce a determinate pose.
    #[error("Degenerate configuration: {0}")]
    DegenerateConfiguration(String),

    /// Reading a configuration file failed.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document is not valid JSON for the expected schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<PnPError> for TrackingError {
    fn from(e: PnPError) -> Self {
        if e.is_degenerate() {
            TrackingError::DegenerateConfiguration(e.to_string())
        } else {
            TrackingError::InvalidConfiguration(e.to_string())
        }
    }
}

impl From<CameraError> for TrackingError {
    fn from(e: CameraError) -> Self {
        TrackingError::InvalidConfiguration(e.to_string())
    }
}
