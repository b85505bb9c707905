#![allow(clippy::op_ref)]

use crate::camera::{CameraIntrinsics, CameraModel};
use crate::types::{NumericTol, PnPError, RawPose, MIN_CORRESPONDENCES};
use glam::{DVec2, DVec3};
use nalgebra::{Matrix3, Rotation3, SymmetricEigen, Vector2, Vector3};

/// Correspondences converted to solver types, with lens distortion removed.
pub(crate) struct PreparedPoints {
    pub world: Vec<Vector3<f64>>,
    pub image: Vec<Vector2<f64>>,
}

/// Spatial layout of the object points, from the covariance spectrum.
pub(crate) enum PointLayout {
    /// Points are coincident or collinear.
    Degenerate,
    /// Points lie on a plane; `frame` columns are two in-plane axes and the normal.
    Planar {
        centroid: Vector3<f64>,
        frame: Matrix3<f64>,
    },
    /// Points span three dimensions. Eigen pairs sorted by decreasing eigenvalue.
    General {
        centroid: Vector3<f64>,
        eigenvalues: [f64; 3],
        axes: [Vector3<f64>; 3],
    },
}

pub(crate) fn check_inputs(world: &[DVec3], image: &[DVec2]) -> Result<(), PnPError> {
    if world.len() != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: image.len(),
        });
    }
    if world.len() < MIN_CORRESPONDENCES {
        return Err(PnPError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            actual: world.len(),
        });
    }
    Ok(())
}

pub(crate) fn prepare(
    world: &[DVec3],
    image: &[DVec2],
    camera: &CameraModel,
) -> Result<PreparedPoints, PnPError> {
    check_inputs(world, image)?;
    if world.iter().any(|p| !p.is_finite()) || image.iter().any(|p| !p.is_finite()) {
        return Err(PnPError::DegenerateConfiguration(
            "correspondences contain non-finite coordinates".to_string(),
        ));
    }
    let image = camera
        .undistort_points(image)
        .into_iter()
        .map(|uv| Vector2::new(uv.x, uv.y))
        .collect();
    let world = world.iter().map(|&p| to_na(p)).collect();
    Ok(PreparedPoints { world, image })
}

#[inline]
pub(crate) fn to_na(p: DVec3) -> Vector3<f64> {
    Vector3::new(p.x, p.y, p.z)
}

#[inline]
pub(crate) fn to_glam(v: &Vector3<f64>) -> DVec3 {
    DVec3::new(v.x, v.y, v.z)
}

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[Vector3<f64>]) -> Vector3<f64> {
    let n = pts.len() as f64;
    pts.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n
}

/// Classify the object points by the eigenvalues of their covariance.
pub(crate) fn classify_layout(pts: &[Vector3<f64>], tol: &NumericTol) -> PointLayout {
    let centroid = compute_centroid(pts);
    let mut cov = Matrix3::<f64>::zeros();
    for p in pts {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    cov /= pts.len() as f64;

    let eig = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let eigenvalues = order.map(|i| eig.eigenvalues[i].max(0.0));
    let axes = order.map(|i| eig.eigenvectors.column(i).into_owned());

    let largest = eigenvalues[0];
    if !largest.is_finite() || largest <= f64::EPSILON * f64::EPSILON {
        return PointLayout::Degenerate;
    }
    if eigenvalues[1] <= tol.collinear * largest {
        return PointLayout::Degenerate;
    }
    if eigenvalues[2] <= tol.planar * largest {
        let normal = axes[0].cross(&axes[1]);
        let frame = Matrix3::from_columns(&[axes[0], axes[1], normal]);
        return PointLayout::Planar { centroid, frame };
    }
    PointLayout::General {
        centroid,
        eigenvalues,
        axes,
    }
}

/// Closest rotation matrix in the Frobenius sense.
pub(crate) fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut d = Matrix3::<f64>::identity();
    if (u * v_t).determinant() < 0.0 {
        d[(2, 2)] = -1.0;
    }
    Some(u * d * v_t)
}

/// Rigid alignment (Kabsch): returns `(R, t)` with `dst ≈ R * src + t`.
pub(crate) fn kabsch(
    src: &[Vector3<f64>],
    dst: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let mu_s = compute_centroid(src);
    let mu_d = compute_centroid(dst);

    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        h += (d - mu_d) * (s - mu_s).transpose();
    }

    let r = nearest_rotation(&h)?;
    let t = mu_d - r * mu_s;
    Some((r, t))
}

/// Rodrigues vector of a rotation matrix.
pub(crate) fn rvec_from_rotation(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix_unchecked(*r).scaled_axis()
}

/// Rotation matrix of a Rodrigues vector.
pub(crate) fn rotation_from_rvec(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*rvec).into_inner()
}

pub(crate) fn raw_pose(r: &Matrix3<f64>, t: &Vector3<f64>) -> RawPose {
    RawPose::new(to_glam(&rvec_from_rotation(r)), to_glam(t))
}

/// Root-mean-square reprojection error in pixels.
///
/// Points on or behind the image plane make the error infinite.
pub(crate) fn reprojection_rmse(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    k: &CameraIntrinsics,
) -> f64 {
    let mut sum_sq = 0.0;
    for (pw, uv) in world.iter().zip(image.iter()) {
        match project_sq_error(pw, uv, r, t, k) {
            Some(e) => sum_sq += e,
            None => return f64::INFINITY,
        }
    }
    (sum_sq / world.len() as f64).sqrt()
}

/// Squared pixel error of one correspondence, `None` if the point is behind the camera.
#[inline]
pub(crate) fn project_sq_error(
    world_point: &Vector3<f64>,
    image_point: &Vector2<f64>,
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    k: &CameraIntrinsics,
) -> Option<f64> {
    let pc = r * world_point + t;
    if pc.z <= 0.0 {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let du = k.fx.mul_add(pc.x * inv_z, k.cx) - image_point.x;
    let dv = k.fy.mul_add(pc.y * inv_z, k.cy) - image_point.y;
    Some(du.mul_add(du, dv * dv))
}
