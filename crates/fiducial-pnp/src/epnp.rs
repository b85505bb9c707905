//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp

use crate::camera::{CameraIntrinsics, CameraModel};
use crate::ops::{
    classify_layout, kabsch, prepare, raw_pose, reprojection_rmse, PointLayout,
};
use crate::types::{NumericTol, PnPError, PnPSolution};
use glam::{DVec2, DVec3};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, SMatrix, Vector3, Vector4};

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Gauss-Newton iterations applied to each beta approximation.
    pub gauss_newton_iters: usize,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            gauss_newton_iters: 5,
        }
    }
}

impl EPnP {
    /// Solve for the object pose from non-planar 2D-3D correspondences.
    ///
    /// # Arguments
    /// * `world` – 3-D object points, `N ≥ 4`, not coplanar.
    /// * `image` – Corresponding (possibly distorted) pixel coordinates.
    /// * `camera` – Camera model; image points are undistorted first.
    /// * `params` – Solver parameters.
    pub fn solve(
        world: &[DVec3],
        image: &[DVec2],
        camera: &CameraModel,
        params: &EPnPParams,
    ) -> Result<PnPSolution, PnPError> {
        let pts = prepare(world, image, camera)?;
        let (centroid, eigenvalues, axes) = match classify_layout(&pts.world, &params.tol) {
            PointLayout::General {
                centroid,
                eigenvalues,
                axes,
            } => (centroid, eigenvalues, axes),
            PointLayout::Planar { .. } => {
                return Err(PnPError::DegenerateConfiguration(
                    "EPnP requires non-coplanar object points".to_string(),
                ))
            }
            PointLayout::Degenerate => {
                return Err(PnPError::DegenerateConfiguration(
                    "object points are collinear or coincident".to_string(),
                ))
            }
        };

        let cw = control_points(&centroid, &eigenvalues, &axes);
        let (r, t, rmse) = solve_epnp(&pts.world, &pts.image, camera.intrinsics(), &cw, params)?;

        Ok(PnPSolution {
            pose: raw_pose(&r, &t),
            reproj_rmse: Some(rmse),
            num_iterations: None,
            converged: Some(true),
        })
    }
}

/// Control points: centroid plus the principal axes scaled by their standard deviation.
pub(crate) fn control_points(
    centroid: &Vector3<f64>,
    eigenvalues: &[f64; 3],
    axes: &[Vector3<f64>; 3],
) -> [Vector3<f64>; 4] {
    let mut cw = [*centroid; 4];
    for (i, (lambda, axis)) in eigenvalues.iter().zip(axes.iter()).enumerate() {
        cw[i + 1] = centroid + axis * lambda.sqrt();
    }
    cw
}

pub(crate) fn solve_epnp(
    world: &[Vector3<f64>],
    image: &[nalgebra::Vector2<f64>],
    k: &CameraIntrinsics,
    cw: &[Vector3<f64>; 4],
    params: &EPnPParams,
) -> Result<(Matrix3<f64>, Vector3<f64>, f64), PnPError> {
    let alphas = compute_barycentric(world, cw, params.tol.svd)?;
    let m = build_m(&alphas, image, k);

    // Null-space of M: eigenvectors of MᵀM with the four smallest eigenvalues.
    let mtm = m.transpose() * &m;
    let eig = mtm.symmetric_eigen();
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let null4: [DVector<f64>; 4] =
        std::array::from_fn(|i| eig.eigenvectors.column(order[i]).into_owned());

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(cw);

    let candidates = [
        estimate_beta_n4(&l, &rho, params.tol.svd),
        estimate_beta_n2(&l, &rho, params.tol.svd),
        estimate_beta_n3(&l, &rho, params.tol.svd),
    ];

    let mut best: Option<(Matrix3<f64>, Vector3<f64>, f64)> = None;
    for betas in candidates.into_iter().flatten() {
        let betas = gauss_newton(betas, &l, &rho, params.gauss_newton_iters);
        let Some((r, t)) = pose_from_betas(&betas, &null4, &alphas, world) else {
            continue;
        };
        let err = reprojection_rmse(world, image, &r, &t, k);
        if err.is_finite() && best.as_ref().map_or(true, |(_, _, e)| err < *e) {
            best = Some((r, t, err));
        }
    }

    best.ok_or_else(|| {
        PnPError::DegenerateConfiguration("no EPnP beta approximation produced a pose".to_string())
    })
}

/// Barycentric coordinates of each world point with respect to the control points.
///
/// Each row `[α0, α1, α2, α3]` satisfies `Σ αj = 1` and `pw = Σ αj cwj`.
fn compute_barycentric(
    world: &[Vector3<f64>],
    cw: &[Vector3<f64>; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let b = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);
    let b_inv = match b.try_inverse() {
        Some(inv) => inv,
        None => b.svd(true, true).pseudo_inverse(eps).map_err(|e| PnPError::SvdFailed(e.to_string()))?,
    };

    Ok(world
        .iter()
        .map(|p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Construct the 2N×12 design matrix **M** used by EPnP.
fn build_m(alphas: &[[f64; 4]], image: &[nalgebra::Vector2<f64>], k: &CameraIntrinsics) -> DMatrix<f64> {
    let n = alphas.len();
    let mut m = DMatrix::<f64>::zeros(2 * n, 12);

    for (i, (a, uv)) in alphas.iter().zip(image.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * k.fx;
            m[(row_x, base + 2)] = alpha * (k.cx - uv.x);
            m[(row_y, base + 1)] = alpha * k.fy;
            m[(row_y, base + 2)] = alpha * (k.cy - uv.y);
        }
    }
    m
}

#[inline]
fn block(v: &DVector<f64>, cp: usize) -> Vector3<f64> {
    Vector3::new(v[3 * cp], v[3 * cp + 1], v[3 * cp + 2])
}

/// Build the 6×10 matrix **L** relating the products of betas to control-point distances.
///
/// Column order: `b00, b01, b11, b02, b12, b22, b03, b13, b23, b33`.
fn build_l6x10(null4: &[DVector<f64>; 4]) -> SMatrix<f64, 6, 10> {
    let mut l = SMatrix::<f64, 6, 10>::zeros();
    for (row, &(a, b)) in CP_PAIRS.iter().enumerate() {
        let dv: [Vector3<f64>; 4] = std::array::from_fn(|i| block(&null4[i], a) - block(&null4[i], b));
        l[(row, 0)] = dv[0].dot(&dv[0]);
        l[(row, 1)] = 2.0 * dv[0].dot(&dv[1]);
        l[(row, 2)] = dv[1].dot(&dv[1]);
        l[(row, 3)] = 2.0 * dv[0].dot(&dv[2]);
        l[(row, 4)] = 2.0 * dv[1].dot(&dv[2]);
        l[(row, 5)] = dv[2].dot(&dv[2]);
        l[(row, 6)] = 2.0 * dv[0].dot(&dv[3]);
        l[(row, 7)] = 2.0 * dv[1].dot(&dv[3]);
        l[(row, 8)] = 2.0 * dv[2].dot(&dv[3]);
        l[(row, 9)] = dv[3].dot(&dv[3]);
    }
    l
}

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[Vector3<f64>; 4]) -> DVector<f64> {
    DVector::from_iterator(6, CP_PAIRS.iter().map(|&(i, j)| (cw[i] - cw[j]).norm_squared()))
}

/// Least-squares solve of `L[:, cols] x = rho`.
fn solve_l_subset(
    l: &SMatrix<f64, 6, 10>,
    rho: &DVector<f64>,
    cols: &[usize],
    tol_svd: f64,
) -> Option<DVector<f64>> {
    let l_sub = DMatrix::from_fn(6, cols.len(), |r, c| l[(r, cols[c])]);
    l_sub.svd(true, true).solve(rho, tol_svd).ok()
}

/// Approximation with all four betas from `b00, b01, b02, b03`.
fn estimate_beta_n4(l: &SMatrix<f64, 6, 10>, rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 3, 6], tol)?;
    let sign = if x[0] < 0.0 { -1.0 } else { 1.0 };
    let b0 = (sign * x[0]).sqrt();
    if b0 == 0.0 {
        return None;
    }
    Some([b0, sign * x[1] / b0, sign * x[2] / b0, sign * x[3] / b0])
}

/// Approximation with two betas from `b00, b01, b11`.
fn estimate_beta_n2(l: &SMatrix<f64, 6, 10>, rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2], tol)?;
    let (mut b0, b1) = if x[0] < 0.0 {
        ((-x[0]).sqrt(), if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 })
    } else {
        (x[0].sqrt(), if x[2] > 0.0 { x[2].sqrt() } else { 0.0 })
    };
    if x[1] < 0.0 {
        b0 = -b0;
    }
    Some([b0, b1, 0.0, 0.0])
}

/// Approximation with three betas from `b00, b01, b11, b02, b12`.
fn estimate_beta_n3(l: &SMatrix<f64, 6, 10>, rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2, 3, 4], tol)?;
    let (mut b0, b1) = if x[0] < 0.0 {
        ((-x[0]).sqrt(), if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 })
    } else {
        (x[0].sqrt(), if x[2] > 0.0 { x[2].sqrt() } else { 0.0 })
    };
    if x[1] < 0.0 {
        b0 = -b0;
    }
    if b0 == 0.0 {
        return None;
    }
    Some([b0, b1, x[3] / b0, 0.0])
}

#[inline]
fn beta_products(b: &[f64; 4]) -> [f64; 10] {
    [
        b[0] * b[0],
        b[0] * b[1],
        b[1] * b[1],
        b[0] * b[2],
        b[1] * b[2],
        b[2] * b[2],
        b[0] * b[3],
        b[1] * b[3],
        b[2] * b[3],
        b[3] * b[3],
    ]
}

/// Refine the betas by Gauss-Newton on the control-point distance constraints.
fn gauss_newton(
    beta_init: [f64; 4],
    l: &SMatrix<f64, 6, 10>,
    rho: &DVector<f64>,
    iters: usize,
) -> [f64; 4] {
    let mut b = beta_init;

    for _ in 0..iters {
        let mut jac = SMatrix::<f64, 6, 4>::zeros();
        let mut res = SMatrix::<f64, 6, 1>::zeros();
        let prod = beta_products(&b);

        for r in 0..6 {
            let row = l.row(r);
            jac[(r, 0)] = 2.0 * row[0] * b[0] + row[1] * b[1] + row[3] * b[2] + row[6] * b[3];
            jac[(r, 1)] = row[1] * b[0] + 2.0 * row[2] * b[1] + row[4] * b[2] + row[7] * b[3];
            jac[(r, 2)] = row[3] * b[0] + row[4] * b[1] + 2.0 * row[5] * b[2] + row[8] * b[3];
            jac[(r, 3)] = row[6] * b[0] + row[7] * b[1] + row[8] * b[2] + 2.0 * row[9] * b[3];
            let fit: f64 = (0..10).map(|c| row[c] * prod[c]).sum();
            res[r] = rho[r] - fit;
        }

        let jt = jac.transpose();
        let a: Matrix4<f64> = jt * jac + Matrix4::identity() * 1e-12;
        let rhs: Vector4<f64> = jt * res;
        let Some(delta) = a.lu().solve(&rhs) else {
            break;
        };
        for (bi, di) in b.iter_mut().zip(delta.iter()) {
            *bi += di;
        }
        if delta.norm() < 1e-12 {
            break;
        }
    }
    b
}

/// Recover `(R, t)` from the betas: camera-frame control points, then rigid alignment.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &[DVector<f64>; 4],
    alphas: &[[f64; 4]],
    world: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let mut cc = [Vector3::<f64>::zeros(); 4];
    for (j, c) in cc.iter_mut().enumerate() {
        for (beta, v) in betas.iter().zip(null4.iter()) {
            *c += block(v, j) * *beta;
        }
    }

    let mut pcs: Vec<Vector3<f64>> = alphas
        .iter()
        .map(|a| cc[0] * a[0] + cc[1] * a[1] + cc[2] * a[2] + cc[3] * a[3])
        .collect();

    // The null-space solution is defined up to sign; keep points in front of the camera.
    if pcs[0].z < 0.0 {
        for p in &mut pcs {
            *p = -*p;
        }
    }

    kabsch(world, &pcs)
}
