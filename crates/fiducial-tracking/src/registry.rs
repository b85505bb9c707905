//! Per-identity tracking state.

use crate::convert::{pose_from_raw, PoseData};
use crate::filter::{FilterMode, FilterState};
use fiducial_pnp::RawPose;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// One tracked identity: its host target and everything carried between frames.
#[derive(Debug, Clone)]
pub struct TrackedEntity<T> {
    /// Host-owned handle written on every accepted frame.
    pub target: T,
    filter: FilterState,
    seed: Option<RawPose>,
    in_view: bool,
    visible: bool,
    missed_frames: u32,
}

impl<T> TrackedEntity<T> {
    /// Fresh entity: no filter history, no seed, not in view.
    pub fn new(target: T) -> Self {
        Self {
            target,
            filter: FilterState::new(),
            seed: None,
            in_view: false,
            visible: true,
            missed_frames: 0,
        }
    }

    /// Filter history.
    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Last trusted raw pose, used to seed the next iterative solve.
    pub fn seed(&self) -> Option<&RawPose> {
        self.seed.as_ref()
    }

    /// Whether the last observation produced a trusted pose.
    pub fn in_view(&self) -> bool {
        self.in_view
    }

    /// Whether the target is currently shown.
    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Consecutive frames this identity was absent from the observations.
    pub fn missed_frames(&self) -> u32 {
        self.missed_frames
    }

    /// Convert `raw`, run it through the filter and return the smoothed pose.
    pub fn update_filter(&mut self, raw: &RawPose, mode: &FilterMode) -> PoseData {
        self.filter.update(pose_from_raw(raw), mode)
    }

    /// Forget filter history and seed. The target keeps its last transform.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.seed = None;
        self.in_view = false;
    }

    pub(crate) fn accept(&mut self, raw: RawPose) {
        self.seed = Some(raw);
        self.in_view = true;
    }

    pub(crate) fn reject(&mut self, clear_seed: bool) {
        if clear_seed {
            self.seed = None;
        }
        self.in_view = false;
    }

    pub(crate) fn set_visible_flag(&mut self, visible: bool) {
        self.visible = visible;
    }
}

/// Result of driving one frame through [`TrackedEntityRegistry::for_each_observed`].
#[derive(Debug)]
pub struct ObservedFrame<K, R> {
    /// Per observation, in input order; `None` for identities with no entity.
    pub results: Vec<(K, Option<R>)>,
    /// Registered identities that were not observed.
    pub absent: Vec<K>,
    /// Repeats of an identity already processed this frame, not passed to
    /// the frame callback.
    pub duplicates: Vec<K>,
}

/// Map from identity to [`TrackedEntity`]. Entities never share state.
#[derive(Debug, Clone)]
pub struct TrackedEntityRegistry<K, T> {
    entities: HashMap<K, TrackedEntity<T>>,
}

impl<K, T> Default for TrackedEntityRegistry<K, T> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, T> TrackedEntityRegistry<K, T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `identity` with `target`, replacing any previous entity.
    ///
    /// Returns the previous target, if any.
    pub fn register(&mut self, identity: K, target: T) -> Option<T> {
        self.entities
            .insert(identity, TrackedEntity::new(target))
            .map(|e| e.target)
    }

    /// The entity for `identity`, created with a default target on first sight.
    pub fn get_or_create(&mut self, identity: K) -> &mut TrackedEntity<T>
    where
        T: Default,
    {
        self.entities
            .entry(identity)
            .or_insert_with(|| TrackedEntity::new(T::default()))
    }

    /// Entity of `identity`.
    pub fn get(&self, identity: &K) -> Option<&TrackedEntity<T>> {
        self.entities.get(identity)
    }

    /// Mutable entity of `identity`.
    pub fn get_mut(&mut self, identity: &K) -> Option<&mut TrackedEntity<T>> {
        self.entities.get_mut(identity)
    }

    /// Stop tracking `identity`, returning its target.
    pub fn remove(&mut self, identity: &K) -> Option<T> {
        self.entities.remove(identity).map(|e| e.target)
    }

    /// Whether `identity` is tracked.
    pub fn contains(&self, identity: &K) -> bool {
        self.entities.contains_key(identity)
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterate over all entities.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &TrackedEntity<T>)> {
        self.entities.iter()
    }

    /// Iterate mutably over all entities.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut TrackedEntity<T>)> {
        self.entities.iter_mut()
    }

    /// Filter a raw pose for one identity. `None` if the identity is unknown.
    pub fn update_filter(
        &mut self,
        identity: &K,
        raw: &RawPose,
        mode: &FilterMode,
    ) -> Option<PoseData> {
        self.entities
            .get_mut(identity)
            .map(|e| e.update_filter(raw, mode))
    }

    /// Run `frame_fn` once per observation on that identity's entity.
    ///
    /// Unknown identities are passed to `create`; returning `None` leaves them
    /// untracked. Entities not observed this frame are left untouched apart
    /// from their missed-frame counter. Each entity is handed to `frame_fn`
    /// at most once per call; later observations of it land in
    /// [`ObservedFrame::duplicates`].
    pub fn for_each_observed<C, R, I, N, F>(
        &mut self,
        observations: I,
        mut create: N,
        mut frame_fn: F,
    ) -> ObservedFrame<K, R>
    where
        I: IntoIterator<Item = (K, C)>,
        N: FnMut(&K) -> Option<T>,
        F: FnMut(&K, &mut TrackedEntity<T>, C) -> R,
    {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        let mut duplicates = Vec::new();

        for (identity, observation) in observations {
            if seen.contains(&identity) {
                duplicates.push(identity);
                continue;
            }
            if !self.entities.contains_key(&identity) {
                if let Some(target) = create(&identity) {
                    self.entities
                        .insert(identity.clone(), TrackedEntity::new(target));
                }
            }
            let result = self.entities.get_mut(&identity).map(|entity| {
                entity.missed_frames = 0;
                frame_fn(&identity, entity, observation)
            });
            if result.is_some() {
                seen.insert(identity.clone());
            }
            results.push((identity, result));
        }

        let mut absent = Vec::new();
        for (identity, entity) in self.entities.iter_mut() {
            if !seen.contains(identity) {
                entity.missed_frames = entity.missed_frames.saturating_add(1);
                absent.push(identity.clone());
            }
        }

        ObservedFrame {
            results,
            absent,
            duplicates,
        }
    }
}
