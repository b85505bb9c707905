//! Levenberg–Marquardt pose refinement for PnP solutions.

use crate::camera::{CameraIntrinsics, CameraModel};
use crate::ops::{prepare, raw_pose, rotation_from_rvec, rvec_from_rotation, to_na};
use crate::types::{PnPError, PnPSolution, RawPose};
use glam::{DVec2, DVec3};
use nalgebra::{Matrix3, Matrix6, Vector2, Vector3, Vector6};

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on squared reprojection error decrease.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Refine a pose with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// - `world`: object points (N ≥ 4)
/// - `image`: pixel points, undistorted through `camera` before use
/// - `seed`: initial pose
///
/// The seed must place every object point in front of the camera.
pub fn refine_pose_lm(
    world: &[DVec3],
    image: &[DVec2],
    camera: &CameraModel,
    seed: &RawPose,
    params: &LMParams,
) -> Result<PnPSolution, PnPError> {
    if !seed.is_finite() {
        return Err(PnPError::DegenerateConfiguration(
            "initial pose is not finite".to_string(),
        ));
    }
    let pts = prepare(world, image, camera)?;
    let r0 = rotation_from_rvec(&to_na(seed.rvec));
    let t0 = to_na(seed.tvec);
    refine_prepared(&pts.world, &pts.image, camera.intrinsics(), &r0, &t0, params)
}

pub(crate) fn refine_prepared(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    k: &CameraIntrinsics,
    r0: &Matrix3<f64>,
    t0: &Vector3<f64>,
    params: &LMParams,
) -> Result<PnPSolution, PnPError> {
    let n = world.len();
    let rv0 = rvec_from_rotation(r0);
    // x = [rx, ry, rz, tx, ty, tz]
    let mut x = Vector6::new(rv0.x, rv0.y, rv0.z, t0.x, t0.y, t0.z);

    let mut residuals = vec![0.0f64; 2 * n];
    let mut residuals_p = vec![0.0f64; 2 * n];
    let mut residuals_m = vec![0.0f64; 2 * n];

    let mut err_sq_base = project_all_in_place(world, image, k, &x, &mut residuals).ok_or_else(|| {
        PnPError::DegenerateConfiguration("initial pose places points behind the camera".to_string())
    })?;

    let mut lambda = params.lambda_init;
    let mut iters = 0usize;
    let mut converged = false;
    let mut jac = vec![[0.0f64; 6]; 2 * n];

    while iters < params.max_iters {
        iters += 1;
        const H_ROT: f64 = 1e-6;
        let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        let h_trans = 1e-6 * t_scale;

        let mut jac_ok = true;
        for k_idx in 0..6 {
            // central differences
            let h = if k_idx < 3 { H_ROT } else { h_trans };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k_idx] += h;
            x_minus[k_idx] -= h;
            let plus = project_all_in_place(world, image, k, &x_plus, &mut residuals_p);
            let minus = project_all_in_place(world, image, k, &x_minus, &mut residuals_m);
            if plus.is_none() || minus.is_none() {
                jac_ok = false;
                break;
            }
            for (row, (rp, rm)) in jac.iter_mut().zip(residuals_p.iter().zip(residuals_m.iter())) {
                row[k_idx] = (rp - rm) / (2.0 * h);
            }
        }
        if !jac_ok {
            break;
        }

        // (JᵀJ + λI) δ = -Jᵀr
        let mut a = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();
        for (row, &r_val) in jac.iter().zip(residuals.iter()) {
            let j_row = Vector6::from_column_slice(row);
            b += j_row * r_val;
            a += j_row * j_row.transpose();
        }
        for d in 0..6 {
            a[(d, d)] += lambda;
        }

        match a.lu().solve(&(-b)) {
            Some(delta) => {
                let x_new = x + delta;
                match project_all_in_place(world, image, k, &x_new, &mut residuals_p) {
                    Some(err_sq_new) if err_sq_new < err_sq_base => {
                        x = x_new;
                        residuals.copy_from_slice(&residuals_p);
                        let decrease = err_sq_base - err_sq_new;
                        err_sq_base = err_sq_new;
                        if decrease < params.eps {
                            converged = true;
                            break;
                        }
                        lambda = (lambda / params.lambda_mul).max(1e-12);
                    }
                    _ => lambda *= params.lambda_mul,
                }
            }
            None => lambda *= params.lambda_mul,
        }
        if err_sq_base < params.eps {
            converged = true;
            break;
        }
    }

    let rvec = Vector3::new(x[0], x[1], x[2]);
    let t = Vector3::new(x[3], x[4], x[5]);
    let r = rotation_from_rvec(&rvec);
    let pose = raw_pose(&r, &t);
    if !pose.is_finite() {
        return Err(PnPError::DegenerateConfiguration(
            "refined pose is not finite".to_string(),
        ));
    }

    log::debug!("LM refinement: {iters} iterations, converged = {converged}");

    Ok(PnPSolution {
        pose,
        reproj_rmse: Some((err_sq_base / n as f64).sqrt()),
        num_iterations: Some(iters),
        converged: Some(converged),
    })
}

/// Writes pixel residuals for parameters `x`, returning the squared error sum.
///
/// Returns `None` when a point falls on or behind the image plane.
fn project_all_in_place(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    k: &CameraIntrinsics,
    x: &Vector6<f64>,
    out: &mut [f64],
) -> Option<f64> {
    let r = rotation_from_rvec(&Vector3::new(x[0], x[1], x[2]));
    let t = Vector3::new(x[3], x[4], x[5]);

    let mut sum_sq = 0.0;
    for (i, (pw, uv)) in world.iter().zip(image.iter()).enumerate() {
        let pc = r * pw + t;
        if pc.z <= 0.0 {
            return None;
        }
        let inv_z = 1.0 / pc.z;
        let du = k.fx.mul_add(pc.x * inv_z, k.cx) - uv.x;
        let dv = k.fy.mul_add(pc.y * inv_z, k.cy) - uv.y;
        out[2 * i] = du;
        out[2 * i + 1] = dv;
        sum_sq += du.mul_add(du, dv * dv);
    }
    Some(sum_sq)
}
