//! Pinhole camera model with OpenCV-ordered polynomial lens distortion.

use glam::{DMat3, DMat4, DVec2, DVec3, DVec4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of distortion coefficients accepted (OpenCV ordering).
pub const MAX_DISTORTION_COEFFS: usize = 14;

/// Distortion vectors shorter than this are zero-padded.
pub const MIN_DISTORTION_COEFFS: usize = 5;

const UNDISTORT_MAX_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-14;

/// Error types for camera operations.
#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    /// Focal lengths must be strictly positive and all intrinsics finite.
    #[error("Invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),

    /// Image dimensions must be non-zero.
    #[error("Invalid image size {width}x{height}")]
    InvalidImageSize {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },

    /// Distortion vector is too long, non-finite or uses unsupported terms.
    #[error("Invalid distortion parameters: {0}")]
    InvalidDistortion(String),

    /// Clip planes must satisfy `0 < near < far`.
    #[error("Invalid clip planes: near {near}, far {far}")]
    InvalidClipPlanes {
        /// Near clip distance.
        near: f64,
        /// Far clip distance.
        far: f64,
    },
}

/// Represents the intrinsic parameters of a pinhole camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Pixel coordinates to normalized image coordinates (no distortion applied).
    #[inline]
    pub fn normalize(&self, uv: DVec2) -> DVec2 {
        DVec2::new((uv.x - self.cx) / self.fx, (uv.y - self.cy) / self.fy)
    }

    /// Normalized image coordinates to pixel coordinates.
    #[inline]
    pub fn denormalize(&self, xy: DVec2) -> DVec2 {
        DVec2::new(xy.x.mul_add(self.fx, self.cx), xy.y.mul_add(self.fy, self.cy))
    }

    fn validate(&self) -> Result<(), CameraError> {
        let finite = [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(CameraError::InvalidIntrinsics(
                "intrinsics must be finite".to_string(),
            ));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        Ok(())
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageSize {
    fn validate(&self) -> Result<(), CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::InvalidImageSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Lens distortion in OpenCV order:
/// `k1, k2, p1, p2, k3, k4, k5, k6, s1, s2, s3, s4, tau_x, tau_y`.
///
/// The tilted-sensor terms `tau_x, tau_y` are accepted only when zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Distortion {
    coeffs: Vec<f64>,
}

impl Default for Distortion {
    fn default() -> Self {
        Self::none()
    }
}

impl Distortion {
    /// Zero distortion, stored as five zero coefficients.
    pub fn none() -> Self {
        Self {
            coeffs: vec![0.0; MIN_DISTORTION_COEFFS],
        }
    }

    /// Build a distortion model from up to 14 coefficients.
    pub fn new(coeffs: &[f64]) -> Result<Self, CameraError> {
        if coeffs.len() > MAX_DISTORTION_COEFFS {
            return Err(CameraError::InvalidDistortion(format!(
                "at most {MAX_DISTORTION_COEFFS} coefficients are supported, got {}",
                coeffs.len()
            )));
        }
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(CameraError::InvalidDistortion(
                "coefficients must be finite".to_string(),
            ));
        }
        if coeffs.iter().skip(12).any(|&c| c != 0.0) {
            return Err(CameraError::InvalidDistortion(
                "tilted sensor terms are not supported".to_string(),
            ));
        }

        let mut coeffs = coeffs.to_vec();
        if coeffs.len() < MIN_DISTORTION_COEFFS {
            coeffs.resize(MIN_DISTORTION_COEFFS, 0.0);
        }
        Ok(Self { coeffs })
    }

    /// The stored coefficients (at least five).
    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        self.coeffs.iter().any(|&c| c != 0.0)
    }

    #[inline]
    fn coeff(&self, i: usize) -> f64 {
        self.coeffs.get(i).copied().unwrap_or(0.0)
    }

    /// Apply the forward distortion model to normalized coordinates.
    pub fn distort(&self, xy: DVec2) -> DVec2 {
        let (x, y) = (xy.x, xy.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + self.coeff(0) * r2 + self.coeff(1) * r4 + self.coeff(4) * r6)
            / (1.0 + self.coeff(5) * r2 + self.coeff(6) * r4 + self.coeff(7) * r6);
        let (dx, dy) = self.tangential_and_prism(x, y, r2, r4);
        DVec2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, xy_distorted: DVec2) -> DVec2 {
        if !self.has_distortion() {
            return xy_distorted;
        }

        let (x0, y0) = (xy_distorted.x, xy_distorted.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist = (1.0 + self.coeff(5) * r2 + self.coeff(6) * r4 + self.coeff(7) * r6)
                / (1.0 + self.coeff(0) * r2 + self.coeff(1) * r4 + self.coeff(4) * r6);
            let (dx, dy) = self.tangential_and_prism(x, y, r2, r4);
            let x_new = (x0 - dx) * icdist;
            let y_new = (y0 - dy) * icdist;
            let step = (x_new - x).abs() + (y_new - y).abs();
            x = x_new;
            y = y_new;
            if step < UNDISTORT_EPS {
                break;
            }
        }
        DVec2::new(x, y)
    }

    fn tangential_and_prism(&self, x: f64, y: f64, r2: f64, r4: f64) -> (f64, f64) {
        let (p1, p2) = (self.coeff(2), self.coeff(3));
        let dx = 2.0 * p1 * x * y
            + p2 * (r2 + 2.0 * x * x)
            + self.coeff(8) * r2
            + self.coeff(9) * r4;
        let dy = p1 * (r2 + 2.0 * y * y)
            + 2.0 * p2 * x * y
            + self.coeff(10) * r2
            + self.coeff(11) * r4;
        (dx, dy)
    }
}

impl TryFrom<Vec<f64>> for Distortion {
    type Error = CameraError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Distortion> for Vec<f64> {
    fn from(value: Distortion) -> Self {
        value.coeffs
    }
}

/// A complete camera model with intrinsics, distortion and image size.
///
/// Immutable once built; swap the whole model to recalibrate.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    intrinsics: CameraIntrinsics,
    distortion: Distortion,
    image_size: ImageSize,
}

impl CameraModel {
    /// Create a validated camera model.
    pub fn new(
        intrinsics: CameraIntrinsics,
        distortion: Distortion,
        image_size: ImageSize,
    ) -> Result<Self, CameraError> {
        intrinsics.validate()?;
        image_size.validate()?;
        Ok(Self {
            intrinsics,
            distortion,
            image_size,
        })
    }

    /// Camera model for an uncalibrated image of the given size.
    ///
    /// Uses `fx = fy = max(width, height)`, the principal point at the image
    /// centre and no distortion.
    pub fn derive_default(width: u32, height: u32) -> Result<Self, CameraError> {
        let image_size = ImageSize { width, height };
        image_size.validate()?;

        let focal = width.max(height) as f64;
        let intrinsics =
            CameraIntrinsics::new(focal, focal, width as f64 / 2.0, height as f64 / 2.0);
        Self::new(intrinsics, Distortion::none(), image_size)
    }

    /// Camera intrinsics.
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Lens distortion.
    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// Image size in pixels.
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    /// Model for images downscaled by an integer `divisor` before detection.
    ///
    /// Focal lengths and principal point are divided by the same factor;
    /// distortion is resolution independent and kept as is.
    pub fn downscaled(&self, divisor: u32) -> Result<Self, CameraError> {
        if divisor == 0 {
            return Err(CameraError::InvalidIntrinsics(
                "downscale divisor must be non-zero".to_string(),
            ));
        }
        let d = divisor as f64;
        let k = &self.intrinsics;
        Self::new(
            CameraIntrinsics::new(k.fx / d, k.fy / d, k.cx / d, k.cy / d),
            self.distortion.clone(),
            ImageSize {
                width: self.image_size.width / divisor,
                height: self.image_size.height / divisor,
            },
        )
    }

    /// The 3x3 intrinsics matrix `K`.
    pub fn intrinsics_matrix(&self) -> DMat3 {
        let k = &self.intrinsics;
        DMat3::from_cols(
            DVec3::new(k.fx, 0.0, 0.0),
            DVec3::new(0.0, k.fy, 0.0),
            DVec3::new(k.cx, k.cy, 1.0),
        )
    }

    /// Perspective projection matching `K` exactly.
    ///
    /// Input space looks down `-Z` with `x` right and `y` down; output clip
    /// space maps pixel `(0, 0)` to NDC `(-1, -1)`, pixel `(width, height)` to
    /// `(1, 1)` and depth `near..far` to `0..1`.
    pub fn projection_matrix(&self, near: f64, far: f64) -> Result<DMat4, CameraError> {
        if !(near.is_finite() && far.is_finite()) || near <= 0.0 || far <= near {
            return Err(CameraError::InvalidClipPlanes { near, far });
        }

        let k = &self.intrinsics;
        let w = self.image_size.width as f64;
        let h = self.image_size.height as f64;
        let depth = near - far;

        Ok(DMat4::from_cols(
            DVec4::new(2.0 * k.fx / w, 0.0, 0.0, 0.0),
            DVec4::new(0.0, 2.0 * k.fy / h, 0.0, 0.0),
            DVec4::new(1.0 - 2.0 * k.cx / w, 1.0 - 2.0 * k.cy / h, far / depth, -1.0),
            DVec4::new(0.0, 0.0, near * far / depth, 0.0),
        ))
    }

    /// Horizontal and vertical field of view in degrees.
    pub fn field_of_view(&self) -> (f64, f64) {
        let k = &self.intrinsics;
        let w = self.image_size.width as f64;
        let h = self.image_size.height as f64;
        let fov_x = k.cx.atan2(k.fx) + (w - k.cx).atan2(k.fx);
        let fov_y = k.cy.atan2(k.fy) + (h - k.cy).atan2(k.fy);
        (fov_x.to_degrees(), fov_y.to_degrees())
    }

    /// Remove lens distortion, returning pixel coordinates of an ideal pinhole camera.
    pub fn undistort_points(&self, image: &[DVec2]) -> Vec<DVec2> {
        if !self.distortion.has_distortion() {
            return image.to_vec();
        }
        image
            .iter()
            .map(|&uv| {
                let xy = self.distortion.undistort(self.intrinsics.normalize(uv));
                self.intrinsics.denormalize(xy)
            })
            .collect()
    }

    /// Project a camera-frame point to distorted pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, point_camera: DVec3) -> Option<DVec2> {
        if point_camera.z <= 0.0 {
            return None;
        }
        let xy = DVec2::new(
            point_camera.x / point_camera.z,
            point_camera.y / point_camera.z,
        );
        Some(self.intrinsics.denormalize(self.distortion.distort(xy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn vga() -> CameraModel {
        CameraModel::new(
            CameraIntrinsics::new(640.0, 480.0, 320.0, 240.0),
            Distortion::none(),
            ImageSize {
                width: 640,
                height: 480,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_derive_default() {
        let cam = CameraModel::derive_default(1280, 720).unwrap();
        let k = cam.intrinsics();
        assert_eq!(k.fx, 1280.0);
        assert_eq!(k.fy, 1280.0);
        assert_eq!(k.cx, 640.0);
        assert_eq!(k.cy, 360.0);
        assert_eq!(cam.distortion().coefficients(), &[0.0; 5]);
    }

    #[test]
    fn test_derive_default_rejects_zero_size() {
        assert_eq!(
            CameraModel::derive_default(0, 480),
            Err(CameraError::InvalidImageSize {
                width: 0,
                height: 480
            })
        );
    }

    #[test]
    fn test_new_rejects_non_positive_focal() {
        let res = CameraModel::new(
            CameraIntrinsics::new(0.0, 500.0, 320.0, 240.0),
            Distortion::none(),
            ImageSize {
                width: 640,
                height: 480,
            },
        );
        assert!(matches!(res, Err(CameraError::InvalidIntrinsics(_))));
    }

    #[test]
    fn test_distortion_padding_and_limits() {
        let d = Distortion::new(&[0.1, -0.05]).unwrap();
        assert_eq!(d.coefficients(), &[0.1, -0.05, 0.0, 0.0, 0.0]);

        assert!(Distortion::new(&[0.0; 15]).is_err());

        let mut tilted = [0.0; 14];
        tilted[12] = 0.01;
        assert!(Distortion::new(&tilted).is_err());
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let d = Distortion::new(&[0.12, -0.03, 0.001, -0.0005, 0.002]).unwrap();
        let xy = DVec2::new(0.21, -0.17);
        let back = d.undistort(d.distort(xy));
        assert_relative_eq!(back.x, xy.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, xy.y, epsilon = 1e-9);
    }

    #[test]
    fn test_projection_matrix_maps_image_corners() {
        let cam = vga();
        let proj = cam.projection_matrix(2.0, 10.0).unwrap();
        let flip = DMat4::from_scale(DVec3::new(1.0, 1.0, -1.0));

        // pixel (0, 0) at the near plane
        let p = DVec3::new(-320.0 / 640.0 * 2.0, -240.0 / 480.0 * 2.0, 2.0);
        let clip = proj * flip * p.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert_relative_eq!(ndc.x, -1.0, epsilon = 1e-12);
        assert_relative_eq!(ndc.y, -1.0, epsilon = 1e-12);
        assert_relative_eq!(ndc.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_matrix_rejects_bad_planes() {
        let cam = vga();
        assert!(cam.projection_matrix(0.0, 10.0).is_err());
        assert!(cam.projection_matrix(5.0, 5.0).is_err());
        assert!(cam.projection_matrix(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_downscaled() {
        let cam = vga().downscaled(2).unwrap();
        assert_eq!(cam.intrinsics(), &CameraIntrinsics::new(320.0, 240.0, 160.0, 120.0));
        assert_eq!(
            cam.image_size(),
            ImageSize {
                width: 320,
                height: 240
            }
        );
        assert!(vga().downscaled(0).is_err());
    }

    #[test]
    fn test_field_of_view() {
        let cam = CameraModel::derive_default(640, 640).unwrap();
        let (fov_x, fov_y) = cam.field_of_view();
        let expected = 2.0 * (0.5f64).atan().to_degrees();
        assert_relative_eq!(fov_x, expected, epsilon = 1e-9);
        assert_relative_eq!(fov_y, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_project_behind_camera() {
        assert!(vga().project(DVec3::new(0.0, 0.0, -1.0)).is_none());
        let uv = vga().project(DVec3::new(0.0, 0.0, 3.0)).unwrap();
        assert_eq!(uv, DVec2::new(320.0, 240.0));
    }
}
