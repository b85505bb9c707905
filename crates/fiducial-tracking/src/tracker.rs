//! Per-frame tracking driver.

use crate::compose::compose;
use crate::config::{LossPolicy, TrackerConfig};
use crate::convert::PoseData;
use crate::correspondences::Correspondences;
use crate::error::TrackingError;
use crate::gate::ViewportGate;
use crate::registry::{TrackedEntity, TrackedEntityRegistry};
use crate::target::TransformTarget;
use fiducial_pnp::{CameraModel, DefaultPoseSolver, PnPError, PoseSolver, RawPose, SolveMethod};
use glam::Mat4;
use std::hash::Hash;

/// Accepted frame for one identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackUpdate {
    /// Filtered pose in the engine convention.
    pub pose: PoseData,
    /// World matrix written to the target.
    pub world: Mat4,
    /// Solve that produced the pose.
    pub method: SolveMethod,
}

/// Why an observed identity was not updated.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Correspondences cannot determine a pose.
    InvalidConfiguration(String),
    /// The solver failed on the given geometry, robust retry included.
    DegenerateConfiguration(String),
    /// No solve produced a pose inside the view volume.
    OutOfView,
    /// The identity is not registered and auto registration is off.
    Unregistered,
    /// The identity was already observed earlier in the same frame.
    DuplicateObservation,
}

impl From<TrackingError> for SkipReason {
    fn from(e: TrackingError) -> Self {
        match e {
            TrackingError::DegenerateConfiguration(msg) => SkipReason::DegenerateConfiguration(msg),
            other => SkipReason::InvalidConfiguration(other.to_string()),
        }
    }
}

/// Outcome for one observed identity.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// The target received a new transform.
    Updated(TrackUpdate),
    /// The target kept its previous transform.
    Skipped(SkipReason),
}

impl TrackOutcome {
    /// The update, if the frame was accepted.
    pub fn update(&self) -> Option<&TrackUpdate> {
        match self {
            TrackOutcome::Updated(u) => Some(u),
            TrackOutcome::Skipped(_) => None,
        }
    }
}

/// Everything that happened in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport<K> {
    /// One entry per observation, in input order.
    pub outcomes: Vec<(K, TrackOutcome)>,
    /// Identities hidden this frame by [`LossPolicy::Hide`].
    pub lost: Vec<K>,
}

/// Tracks any number of identities against one camera.
///
/// Each identity carries its own seed, filter history and target; calls must
/// come from one thread, one frame at a time.
pub struct PoseTracker<K, T, S = DefaultPoseSolver> {
    camera: CameraModel,
    gate: ViewportGate,
    config: TrackerConfig,
    solver: S,
    registry: TrackedEntityRegistry<K, T>,
}

impl<K, T> PoseTracker<K, T, DefaultPoseSolver>
where
    K: Eq + Hash + Clone,
{
    /// Tracker with the built-in solver.
    pub fn new(camera: CameraModel, config: TrackerConfig) -> Result<Self, TrackingError> {
        Self::with_solver(camera, config, DefaultPoseSolver::default())
    }
}

impl<K, T, S> PoseTracker<K, T, S>
where
    K: Eq + Hash + Clone,
    S: PoseSolver,
{
    /// Tracker driven by a custom solver.
    pub fn with_solver(
        camera: CameraModel,
        config: TrackerConfig,
        solver: S,
    ) -> Result<Self, TrackingError> {
        config.validate()?;
        let gate = ViewportGate::new(&camera, config.near_clip, config.far_clip)?;
        let (fov_x, fov_y) = camera.field_of_view();
        log::info!(
            "pose tracker initialised: {}x{} image, fov {fov_x:.1}x{fov_y:.1} deg, anchor {:?}",
            camera.image_size().width,
            camera.image_size().height,
            config.anchor
        );
        Ok(Self {
            camera,
            gate,
            config,
            solver,
            registry: TrackedEntityRegistry::new(),
        })
    }

    /// Camera model in use.
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Active settings.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The viewport gate.
    pub fn gate(&self) -> &ViewportGate {
        &self.gate
    }

    /// Tracked identities.
    pub fn registry(&self) -> &TrackedEntityRegistry<K, T> {
        &self.registry
    }

    /// Mutable access to the tracked identities.
    pub fn registry_mut(&mut self) -> &mut TrackedEntityRegistry<K, T> {
        &mut self.registry
    }

    /// Start tracking `identity`, writing into `target`.
    pub fn register(&mut self, identity: K, target: T) -> Option<T> {
        self.registry.register(identity, target)
    }

    /// Target of `identity`.
    pub fn target(&self, identity: &K) -> Option<&T> {
        self.registry.get(identity).map(|e| &e.target)
    }

    /// Whether the last observation of `identity` produced a trusted pose.
    ///
    /// Absence from a frame does not change the flag: under
    /// [`LossPolicy::Retain`] an identity that is no longer observed keeps
    /// its last value until it is observed again or reset. Use
    /// [`TrackedEntity::missed_frames`] to detect staleness.
    pub fn is_in_view(&self, identity: &K) -> bool {
        self.registry.get(identity).is_some_and(|e| e.in_view())
    }

    /// Clear the seed and filter history of one identity.
    ///
    /// Returns `false` if the identity is unknown.
    pub fn reset(&mut self, identity: &K) -> bool {
        match self.registry.get_mut(identity) {
            Some(entity) => {
                entity.reset();
                true
            }
            None => false,
        }
    }

    /// Swap the camera model and reset every identity.
    pub fn reinitialize(&mut self, camera: CameraModel) -> Result<(), TrackingError> {
        self.gate = ViewportGate::new(&camera, self.config.near_clip, self.config.far_clip)?;
        self.camera = camera;
        for (_, entity) in self.registry.iter_mut() {
            entity.reset();
        }
        log::info!(
            "pose tracker reinitialised: {}x{} image, {} identities reset",
            self.camera.image_size().width,
            self.camera.image_size().height,
            self.registry.len()
        );
        Ok(())
    }
}

impl<K, T, S> PoseTracker<K, T, S>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: TransformTarget + Default,
    S: PoseSolver,
{
    /// Process one frame of observations.
    ///
    /// `reference_world` is the known participant's world matrix: the
    /// camera's under [`RelativeToObjectTarget`], the tracked object's under
    /// [`RelativeToCameraTarget`].
    ///
    /// [`RelativeToObjectTarget`]: crate::compose::AnchorMode::RelativeToObjectTarget
    /// [`RelativeToCameraTarget`]: crate::compose::AnchorMode::RelativeToCameraTarget
    pub fn process_frame<I>(&mut self, reference_world: Mat4, observations: I) -> FrameReport<K>
    where
        I: IntoIterator<Item = (K, Correspondences)>,
    {
        let Self {
            camera,
            gate,
            config,
            solver,
            registry,
        } = self;
        let auto_register = config.auto_register;

        let frame = registry.for_each_observed(
            observations,
            |_| auto_register.then(T::default),
            |identity, entity, corr| {
                let outcome = track_entity(
                    solver,
                    camera,
                    gate,
                    config,
                    reference_world,
                    entity,
                    &corr,
                );
                if let TrackOutcome::Skipped(reason) = &outcome {
                    log::warn!("{identity:?}: frame skipped, {reason:?}");
                }
                outcome
            },
        );

        let mut outcomes: Vec<(K, TrackOutcome)> = frame
            .results
            .into_iter()
            .map(|(identity, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    log::debug!("{identity:?}: ignoring unregistered identity");
                    TrackOutcome::Skipped(SkipReason::Unregistered)
                });
                (identity, outcome)
            })
            .collect();
        for identity in frame.duplicates {
            log::warn!("{identity:?}: observed more than once, extra observation ignored");
            outcomes.push((identity, TrackOutcome::Skipped(SkipReason::DuplicateObservation)));
        }

        let mut lost = Vec::new();
        if let LossPolicy::Hide { after_frames } = config.loss_policy {
            for identity in frame.absent {
                let Some(entity) = registry.get_mut(&identity) else {
                    continue;
                };
                if entity.visible() && entity.missed_frames() >= after_frames {
                    entity.target.set_visible(false);
                    entity.set_visible_flag(false);
                    entity.reset();
                    log::debug!("{identity:?}: hidden after {after_frames} absent frames");
                    lost.push(identity);
                }
            }
        }

        FrameReport { outcomes, lost }
    }
}

fn track_entity<T: TransformTarget, S: PoseSolver>(
    solver: &S,
    camera: &CameraModel,
    gate: &ViewportGate,
    config: &TrackerConfig,
    reference_world: Mat4,
    entity: &mut TrackedEntity<T>,
    corr: &Correspondences,
) -> TrackOutcome {
    if let Err(e) = corr.validate() {
        entity.reject(false);
        return TrackOutcome::Skipped(e.into());
    }

    let object = if config.left_handed_object_points {
        corr.left_handed_object_points()
    } else {
        corr.object.clone()
    };

    let (raw, method) = match estimate(solver, camera, gate, &object, &corr.image, entity.seed()) {
        Ok(found) => found,
        Err(reason) => {
            entity.reject(true);
            return TrackOutcome::Skipped(reason);
        }
    };

    entity.accept(raw);
    let pose = entity.update_filter(&raw, &config.filter);
    let world = compose(
        &pose,
        config.axis_inversion,
        config.anchor,
        reference_world,
        reference_world,
    );
    entity.target.set_world_matrix(world);
    if !entity.visible() {
        entity.target.set_visible(true);
        entity.set_visible_flag(true);
    }

    TrackOutcome::Updated(TrackUpdate {
        pose,
        world,
        method,
    })
}

/// Solve with the seed when the gate trusts it, falling back to a robust
/// solve, and gate the result.
fn estimate<S: PoseSolver>(
    solver: &S,
    camera: &CameraModel,
    gate: &ViewportGate,
    object: &[glam::DVec3],
    image: &[glam::DVec2],
    seed: Option<&RawPose>,
) -> Result<(RawPose, SolveMethod), SkipReason> {
    let trusted_seed = seed.filter(|s| gate.is_trustworthy(s));
    if seed.is_some() && trusted_seed.is_none() {
        log::debug!("seed outside the view volume, solving without it");
    }

    let mut attempt = None;
    if let Some(seed) = trusted_seed {
        match solver.solve(object, image, camera, Some(seed), SolveMethod::Iterative) {
            Ok(sol) if gate.is_trustworthy(&sol.pose) => {
                attempt = Some((sol.pose, SolveMethod::Iterative));
            }
            Ok(_) => log::debug!("iterative pose rejected by the gate, re-solving"),
            Err(e) if e.is_degenerate() => {
                log::debug!("iterative solve degenerate ({e}), re-solving")
            }
            Err(e) => return Err(skip_reason(e)),
        }
    }

    if let Some(found) = attempt {
        return Ok(found);
    }

    let sol = solver
        .solve(object, image, camera, None, SolveMethod::Robust)
        .map_err(skip_reason)?;
    if gate.is_trustworthy(&sol.pose) {
        Ok((sol.pose, SolveMethod::Robust))
    } else {
        Err(SkipReason::OutOfView)
    }
}

fn skip_reason(e: PnPError) -> SkipReason {
    TrackingError::from(e).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondences::square_marker_points;
    use fiducial_pnp::PnPSolution;
    use glam::{DVec2, DVec3};
    use std::cell::RefCell;

    /// Solver returning scripted results and recording the calls it receives.
    struct ScriptedSolver {
        results: RefCell<Vec<Result<RawPose, PnPError>>>,
        calls: RefCell<Vec<(SolveMethod, bool)>>,
    }

    impl ScriptedSolver {
        fn new(results: Vec<Result<RawPose, PnPError>>) -> Self {
            Self {
                results: RefCell::new(results),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PoseSolver for ScriptedSolver {
        fn solve(
            &self,
            _world: &[DVec3],
            _image: &[DVec2],
            _camera: &CameraModel,
            seed: Option<&RawPose>,
            method: SolveMethod,
        ) -> Result<PnPSolution, PnPError> {
            self.calls.borrow_mut().push((method, seed.is_some()));
            let next = self.results.borrow_mut().remove(0);
            next.map(|pose| PnPSolution {
                pose,
                reproj_rmse: None,
                num_iterations: None,
                converged: None,
            })
        }
    }

    fn in_front(z: f64) -> RawPose {
        RawPose::new(DVec3::ZERO, DVec3::new(0.0, 0.0, z))
    }

    fn observation() -> Correspondences {
        Correspondences::new(square_marker_points(0.1).to_vec(), vec![DVec2::ZERO; 4])
    }

    fn tracker(results: Vec<Result<RawPose, PnPError>>) -> PoseTracker<u8, Mat4, ScriptedSolver> {
        let camera = CameraModel::derive_default(640, 480).unwrap();
        let config = TrackerConfig {
            filter: crate::filter::FilterMode::Disabled,
            ..TrackerConfig::default()
        };
        let mut t = PoseTracker::with_solver(camera, config, ScriptedSolver::new(results)).unwrap();
        t.register(0, Mat4::IDENTITY);
        t
    }

    fn calls(t: &PoseTracker<u8, Mat4, ScriptedSolver>) -> Vec<(SolveMethod, bool)> {
        t.solver.calls.borrow().clone()
    }

    #[test]
    fn test_cold_start_uses_robust_then_iterative() {
        let mut t = tracker(vec![Ok(in_front(1.0)), Ok(in_front(1.1))]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        assert_eq!(
            calls(&t),
            vec![(SolveMethod::Robust, false), (SolveMethod::Iterative, true)]
        );
        assert!(t.is_in_view(&0));
    }

    #[test]
    fn test_untrusted_iterative_result_triggers_robust() {
        let mut t = tracker(vec![
            Ok(in_front(1.0)),
            Ok(in_front(-1.0)),
            Ok(in_front(1.2)),
        ]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        let report = t.process_frame(Mat4::IDENTITY, [(0, observation())]);

        let update = report.outcomes[0].1.update().unwrap();
        assert_eq!(update.method, SolveMethod::Robust);
        assert_eq!(update.pose.position.z, 1.2);
        assert_eq!(calls(&t)[1..], [(SolveMethod::Iterative, true), (SolveMethod::Robust, false)]);
    }

    #[test]
    fn test_degenerate_iterative_falls_back() {
        let mut t = tracker(vec![
            Ok(in_front(1.0)),
            Err(PnPError::DegenerateConfiguration("flat".into())),
            Ok(in_front(1.0)),
        ]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        let report = t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        assert!(report.outcomes[0].1.update().is_some());
    }

    #[test]
    fn test_out_of_view_keeps_transform_and_clears_seed() {
        let mut t = tracker(vec![
            Ok(in_front(1.0)),
            Ok(in_front(-2.0)),
            Ok(in_front(-3.0)),
            Ok(in_front(1.0)),
        ]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        let before = *t.target(&0).unwrap();

        // Iterative result behind the camera, robust retry too.
        let report = t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        assert_eq!(report.outcomes[0].1, TrackOutcome::Skipped(SkipReason::OutOfView));
        assert_eq!(*t.target(&0).unwrap(), before);
        assert!(!t.is_in_view(&0));
        assert!(t.registry().get(&0).unwrap().seed().is_none());

        // Without a seed the next frame starts robust again.
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        assert_eq!(calls(&t).last(), Some(&(SolveMethod::Robust, false)));
    }

    #[test]
    fn test_non_finite_rotation_triggers_robust() {
        let mut t = tracker(vec![
            Ok(in_front(1.0)),
            Ok(RawPose::new(DVec3::new(f64::NAN, 0.0, 0.0), DVec3::new(0.0, 0.0, 1.0))),
            Ok(in_front(1.2)),
        ]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        let report = t.process_frame(Mat4::IDENTITY, [(0, observation())]);

        let update = report.outcomes[0].1.update().unwrap();
        assert_eq!(update.method, SolveMethod::Robust);
        assert!(update.pose.rotation.is_finite());
        assert!(t.target(&0).unwrap().is_finite());
        assert!(t.registry().get(&0).unwrap().seed().unwrap().is_finite());
        assert_eq!(calls(&t)[1..], [(SolveMethod::Iterative, true), (SolveMethod::Robust, false)]);
    }

    #[test]
    fn test_non_finite_robust_result_is_out_of_view() {
        let nan = RawPose::new(DVec3::new(0.0, f64::INFINITY, 0.0), DVec3::new(0.0, 0.0, 1.0));
        let mut t = tracker(vec![Ok(nan)]);
        let report = t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        assert_eq!(report.outcomes[0].1, TrackOutcome::Skipped(SkipReason::OutOfView));
        assert_eq!(*t.target(&0).unwrap(), Mat4::IDENTITY);
        assert!(!t.is_in_view(&0));
    }

    #[test]
    fn test_repeated_identity_updates_once() {
        let mut t = tracker(vec![Ok(in_front(1.0))]);
        let report = t.process_frame(Mat4::IDENTITY, [(0, observation()), (0, observation())]);
        assert!(report.outcomes[0].1.update().is_some());
        assert_eq!(
            report.outcomes[1],
            (0, TrackOutcome::Skipped(SkipReason::DuplicateObservation))
        );
        assert_eq!(calls(&t), vec![(SolveMethod::Robust, false)]);
    }

    #[test]
    fn test_absent_identity_keeps_in_view_flag() {
        let mut t = tracker(vec![Ok(in_front(1.0))]);
        t.process_frame(Mat4::IDENTITY, [(0, observation())]);
        t.process_frame(Mat4::IDENTITY, Vec::<(u8, Correspondences)>::new());
        assert!(t.is_in_view(&0));
        assert_eq!(t.registry().get(&0).unwrap().missed_frames(), 1);
    }

    #[test]
    fn test_three_points_never_reach_solver() {
        let mut t = tracker(vec![]);
        let corr = Correspondences::new(vec![DVec3::ZERO; 3], vec![DVec2::ZERO; 3]);
        let report = t.process_frame(Mat4::IDENTITY, [(0, corr)]);
        assert!(matches!(
            report.outcomes[0].1,
            TrackOutcome::Skipped(SkipReason::InvalidConfiguration(_))
        ));
        assert!(calls(&t).is_empty());
    }

    #[test]
    fn test_unregistered_identity_ignored() {
        let mut t = tracker(vec![]);
        let report = t.process_frame(Mat4::IDENTITY, [(9, observation())]);
        assert_eq!(report.outcomes, vec![(9, TrackOutcome::Skipped(SkipReason::Unregistered))]);
        assert!(t.registry().get(&9).is_none());
        assert!(calls(&t).is_empty());
    }
}
