//! Method selection and the solver contract used by trackers.

use crate::camera::CameraModel;
use crate::epnp::{control_points, solve_epnp, EPnPParams};
use crate::ops::{classify_layout, prepare, raw_pose, rotation_from_rvec, to_na, PointLayout};
use crate::planar::solve_planar;
use crate::refine::{refine_prepared, LMParams};
use crate::types::{PnPError, PnPSolution, RawPose};
use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Pose-solving strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolveMethod {
    /// Closed-form estimate that needs no prior pose.
    Robust,
    /// Local refinement starting from a prior pose.
    Iterative,
}

/// Produces a raw pose from 2D-3D correspondences.
pub trait PoseSolver {
    /// Estimate the object pose in the camera frame.
    ///
    /// # Arguments
    /// * `world` – Object points, `N ≥ 4`.
    /// * `image` – Matching pixel coordinates.
    /// * `camera` – Camera model used to undistort and project.
    /// * `seed` – Prior pose; required by [`SolveMethod::Iterative`].
    /// * `method` – Strategy to use.
    fn solve(
        &self,
        world: &[DVec3],
        image: &[DVec2],
        camera: &CameraModel,
        seed: Option<&RawPose>,
        method: SolveMethod,
    ) -> Result<PnPSolution, PnPError>;
}

/// Parameters of the seedless solve.
#[derive(Debug, Clone, Default)]
pub struct RobustParams {
    /// EPnP parameters for non-planar targets.
    pub epnp: EPnPParams,
    /// Optional LM polish of the closed-form estimate.
    pub refine: Option<LMParams>,
}

/// Solver combining a homography/EPnP closed form with LM refinement.
#[derive(Debug, Clone)]
pub struct DefaultPoseSolver {
    /// Settings for [`SolveMethod::Robust`].
    pub robust: RobustParams,
    /// Settings for [`SolveMethod::Iterative`].
    pub iterative: LMParams,
}

impl Default for DefaultPoseSolver {
    fn default() -> Self {
        Self {
            robust: RobustParams {
                epnp: EPnPParams::default(),
                refine: Some(LMParams::default()),
            },
            iterative: LMParams::default(),
        }
    }
}

impl PoseSolver for DefaultPoseSolver {
    fn solve(
        &self,
        world: &[DVec3],
        image: &[DVec2],
        camera: &CameraModel,
        seed: Option<&RawPose>,
        method: SolveMethod,
    ) -> Result<PnPSolution, PnPError> {
        match method {
            SolveMethod::Robust => solve_robust(world, image, camera, &self.robust),
            SolveMethod::Iterative => {
                let seed = seed.ok_or(PnPError::MissingSeed)?;
                solve_iterative(world, image, camera, seed, &self.iterative)
            }
        }
    }
}

fn solve_robust(
    world: &[DVec3],
    image: &[DVec2],
    camera: &CameraModel,
    params: &RobustParams,
) -> Result<PnPSolution, PnPError> {
    let pts = prepare(world, image, camera)?;
    let k = camera.intrinsics();

    let (r, t, rmse) = match classify_layout(&pts.world, &params.epnp.tol) {
        PointLayout::Degenerate => {
            return Err(PnPError::DegenerateConfiguration(
                "object points are collinear or coincident".to_string(),
            ))
        }
        PointLayout::Planar { centroid, frame } => {
            solve_planar(&pts.world, &pts.image, k, &centroid, &frame)?
        }
        PointLayout::General {
            centroid,
            eigenvalues,
            axes,
        } => {
            let cw = control_points(&centroid, &eigenvalues, &axes);
            solve_epnp(&pts.world, &pts.image, k, &cw, &params.epnp)?
        }
    };

    let closed_form = PnPSolution {
        pose: raw_pose(&r, &t),
        reproj_rmse: Some(rmse),
        num_iterations: None,
        converged: Some(true),
    };

    if !closed_form.pose.is_finite() {
        return Err(PnPError::DegenerateConfiguration(
            "closed-form pose is not finite".to_string(),
        ));
    }

    let Some(lm) = &params.refine else {
        return Ok(closed_form);
    };
    match refine_prepared(&pts.world, &pts.image, k, &r, &t, lm) {
        Ok(refined) if refined.reproj_rmse.unwrap_or(f64::INFINITY) <= rmse => Ok(refined),
        Ok(_) => Ok(closed_form),
        Err(e) => {
            log::debug!("keeping closed-form pose, refinement failed: {e}");
            Ok(closed_form)
        }
    }
}

fn solve_iterative(
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
    refine_prepared(&pts.world, &pts.image, camera.intrinsics(), &r0, &to_na(seed.tvec), params)
}

/// Solve with the default solver.
///
/// Convenience entry point equivalent to
/// `DefaultPoseSolver::default().solve(world, image, camera, seed, method)`.
pub fn solve_pnp(
    world: &[DVec3],
    image: &[DVec2],
    camera: &CameraModel,
    seed: Option<&RawPose>,
    method: SolveMethod,
) -> Result<PnPSolution, PnPError> {
    DefaultPoseSolver::default().solve(world, image, camera, seed, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraIntrinsics, Distortion, ImageSize};

    fn camera() -> CameraModel {
        CameraModel::new(
            CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0),
            Distortion::none(),
            ImageSize {
                width: 640,
                height: 480,
            },
        )
        .unwrap()
    }

    fn square() -> Vec<DVec3> {
        vec![
            DVec3::new(-0.05, 0.05, 0.0),
            DVec3::new(0.05, 0.05, 0.0),
            DVec3::new(0.05, -0.05, 0.0),
            DVec3::new(-0.05, -0.05, 0.0),
        ]
    }

    #[test]
    fn test_iterative_requires_seed() {
        let image = vec![DVec2::new(300.0, 220.0); 4];
        let res = solve_pnp(&square(), &image, &camera(), None, SolveMethod::Iterative);
        assert!(matches!(res, Err(PnPError::MissingSeed)));
    }

    #[test]
    fn test_too_few_points() {
        let pts = square();
        let world = &pts[..3];
        let image = vec![DVec2::new(300.0, 220.0); 3];
        let res = solve_pnp(world, &image, &camera(), None, SolveMethod::Robust);
        assert!(matches!(
            res,
            Err(PnPError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_robust_then_iterative_agree() -> Result<(), PnPError> {
        let cam = camera();
        let truth = RawPose::new(DVec3::new(0.1, 0.2, -0.05), DVec3::new(0.01, 0.02, 0.5));
        let world = square();
        let image: Vec<DVec2> = world
            .iter()
            .map(|&p| cam.project(truth.transform_point(p)).unwrap())
            .collect();

        let robust = solve_pnp(&world, &image, &cam, None, SolveMethod::Robust)?;
        assert!(robust.reproj_rmse.unwrap() < 1e-6);

        let iterative = solve_pnp(
            &world,
            &image,
            &cam,
            Some(&robust.pose),
            SolveMethod::Iterative,
        )?;
        assert!((iterative.pose.tvec - truth.tvec).length() < 1e-6);
        Ok(())
    }
}
