//! Planar pose from a plane-to-image homography.
//!
//! Square markers put every object point on one plane, where EPnP's control
//! points collapse. The homography between the plane and the normalized image
//! is estimated with a Hartley-normalized DLT and decomposed into `[r1 r2 t]`.

use crate::camera::{CameraIntrinsics, CameraModel};
use crate::ops::{classify_layout, nearest_rotation, prepare, raw_pose, reprojection_rmse, PointLayout};
use crate::types::{NumericTol, PnPError, PnPSolution};
use glam::{DVec2, DVec3};
use nalgebra::{Matrix3, SMatrix, SymmetricEigen, Vector2, Vector3};

/// Marker type for the homography-based planar solver.
pub struct PlanarHomography;

impl PlanarHomography {
    /// Solve for the pose of a planar target.
    ///
    /// Fails with [`PnPError::DegenerateConfiguration`] when the object points
    /// are collinear or do not lie on a plane.
    pub fn solve(
        world: &[DVec3],
        image: &[DVec2],
        camera: &CameraModel,
        tol: &NumericTol,
    ) -> Result<PnPSolution, PnPError> {
        let pts = prepare(world, image, camera)?;
        let (centroid, frame) = match classify_layout(&pts.world, tol) {
            PointLayout::Planar { centroid, frame } => (centroid, frame),
            PointLayout::General { .. } => {
                return Err(PnPError::DegenerateConfiguration(
                    "object points are not coplanar".to_string(),
                ))
            }
            PointLayout::Degenerate => {
                return Err(PnPError::DegenerateConfiguration(
                    "object points are collinear or coincident".to_string(),
                ))
            }
        };

        let (r, t, rmse) = solve_planar(&pts.world, &pts.image, camera.intrinsics(), &centroid, &frame)?;
        Ok(PnPSolution {
            pose: raw_pose(&r, &t),
            reproj_rmse: Some(rmse),
            num_iterations: None,
            converged: Some(true),
        })
    }
}

pub(crate) fn solve_planar(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    k: &CameraIntrinsics,
    centroid: &Vector3<f64>,
    frame: &Matrix3<f64>,
) -> Result<(Matrix3<f64>, Vector3<f64>, f64), PnPError> {
    let frame_t = frame.transpose();
    let plane: Vec<Vector2<f64>> = world
        .iter()
        .map(|p| {
            let q = frame_t * (p - centroid);
            Vector2::new(q.x, q.y)
        })
        .collect();
    let normalized: Vec<Vector2<f64>> = image
        .iter()
        .map(|uv| Vector2::new((uv.x - k.cx) / k.fx, (uv.y - k.cy) / k.fy))
        .collect();

    let h = estimate_homography(&plane, &normalized)?;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let norm = (h1.norm() * h2.norm()).sqrt();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return Err(PnPError::DegenerateConfiguration(
            "homography has vanishing rotation columns".to_string(),
        ));
    }
    let mut s = 1.0 / norm;
    // The target must sit in front of the camera.
    if h3.z * s < 0.0 {
        s = -s;
    }

    let r1 = h1 * s;
    let r2 = h2 * s;
    let r3 = r1.cross(&r2);
    let r_plane = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3])).ok_or_else(|| {
        PnPError::SvdFailed("nearest rotation of homography columns".to_string())
    })?;
    let t_plane = h3 * s;

    // Back from the plane frame to object coordinates.
    let r = r_plane * frame_t;
    let t = t_plane - r * centroid;

    let rmse = reprojection_rmse(world, image, &r, &t, k);
    if !rmse.is_finite() {
        return Err(PnPError::DegenerateConfiguration(
            "planar pose places points behind the camera".to_string(),
        ));
    }
    Ok((r, t, rmse))
}

/// Similarity transform moving the points to the origin with mean distance √2.
fn hartley_normalization(pts: &[Vector2<f64>]) -> Option<Matrix3<f64>> {
    let n = pts.len() as f64;
    let mean = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = pts.iter().map(|p| (p - mean).norm()).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let scale = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(
        scale,
        0.0,
        -scale * mean.x,
        0.0,
        scale,
        -scale * mean.y,
        0.0,
        0.0,
        1.0,
    ))
}

/// Direct linear transform estimate of `H` with `dst ~ H * src`.
fn estimate_homography(
    src: &[Vector2<f64>],
    dst: &[Vector2<f64>],
) -> Result<Matrix3<f64>, PnPError> {
    let degenerate = || PnPError::DegenerateConfiguration("points have no spatial extent".to_string());
    let t_src = hartley_normalization(src).ok_or_else(degenerate)?;
    let t_dst = hartley_normalization(dst).ok_or_else(degenerate)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let p = t_src * Vector3::new(s.x, s.y, 1.0);
        let q = t_dst * Vector3::new(d.x, d.y, 1.0);
        let (x, y) = (p.x / p.z, p.y / p.z);
        let (u, v) = (q.x / q.z, q.y / q.z);

        let rows = [
            [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
            [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
        ];
        for row in &rows {
            let a = SMatrix::<f64, 9, 1>::from_row_slice(row);
            ata += a * a.transpose();
        }
    }

    let eig = SymmetricEigen::new(ata);
    let smallest = eig.eigenvalues.argmin().0;
    let hv = eig.eigenvectors.column(smallest);
    let hn = Matrix3::new(hv[0], hv[1], hv[2], hv[3], hv[4], hv[5], hv[6], hv[7], hv[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| PnPError::SvdFailed("singular image normalization".to_string()))?;
    let h = t_dst_inv * hn * t_src;
    if !h.iter().all(|v| v.is_finite()) {
        return Err(PnPError::DegenerateConfiguration(
            "homography estimate is not finite".to_string(),
        ));
    }
    Ok(h)
}
