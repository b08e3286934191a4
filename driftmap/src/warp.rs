use std::sync::Arc;

use glam::{DMat4, DVec3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::node::{ModifiedEvent, NodeId, Observers, SubscriptionId, TransformNode, WarpNode};
use crate::scene::{ensure_no_cycle, SceneError};

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SplineBasis {
    #[default]
    R,
    R2LogR,
}

/// Paired landmark lists defining a thin-plate-spline warp. Only the defining
/// points are accumulated here; solving the dense field is the host's job.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct ThinPlateSpline {
    pub basis: SplineBasis,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    source: Vec<DVec3>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    target: Vec<DVec3>,
}

impl ThinPlateSpline {
    pub fn new(basis: SplineBasis) -> Self {
        Self {
            basis,
            source: Vec::new(),
            target: Vec::new(),
        }
    }

    /// Appends one landmark pair; insertion order is sampling order.
    pub fn append(&mut self, source: DVec3, target: DVec3) {
        self.source.push(source);
        self.target.push(target);
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.source.len(), self.target.len());
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &[DVec3] {
        &self.source
    }

    pub fn target(&self) -> &[DVec3] {
        &self.target
    }

    /// Displacement recorded at landmark `index`, target minus source.
    pub fn displacement(&self, index: usize) -> Option<DVec3> {
        Some(*self.target.get(index)? - *self.source.get(index)?)
    }
}

struct WarpState {
    spline: Option<ThinPlateSpline>,
    parent: Option<Arc<dyn TransformNode>>,
}

/// In-memory warp node: carries the accumulated spline and sits in the
/// transform hierarchy as a non-linear node.
pub struct Warp {
    id: NodeId,
    name: String,
    state: Mutex<WarpState>,
    observers: Observers,
}

impl Warp {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::unique(),
            name: name.into(),
            state: Mutex::new(WarpState {
                spline: None,
                parent: None,
            }),
            observers: Observers::default(),
        })
    }

    pub fn set_parent(&self, parent: Option<Arc<dyn TransformNode>>) -> Result<(), SceneError> {
        if let Some(parent) = &parent {
            ensure_no_cycle(self.id, &self.name, parent)?;
        }
        self.state.lock().parent = parent;
        self.observers.notify();
        Ok(())
    }

    pub fn observer_count(&self) -> usize {
        self.observers.count()
    }
}

impl WarpNode for Warp {
    fn set_spline(&self, spline: ThinPlateSpline) {
        self.state.lock().spline = Some(spline);
        self.observers.notify();
    }

    fn spline(&self) -> Option<ThinPlateSpline> {
        self.state.lock().spline.clone()
    }

    fn append_landmark(&self, source: DVec3, target: DVec3) {
        let mut state = self.state.lock();
        state
            .spline
            .get_or_insert_with(ThinPlateSpline::default)
            .append(source, target);
    }

    fn landmark_count(&self) -> usize {
        self.state
            .lock()
            .spline
            .as_ref()
            .map_or(0, ThinPlateSpline::len)
    }

    fn mark_modified(&self) {
        self.observers.notify();
    }
}

impl TransformNode for Warp {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    // a landmark warp has no single linear world matrix
    fn world_matrix(&self) -> Option<DMat4> {
        None
    }

    fn parent(&self) -> Option<Arc<dyn TransformNode>> {
        self.state.lock().parent.clone()
    }

    fn is_world_linear(&self) -> bool {
        false
    }

    fn observe(&self, callback: Arc<ModifiedEvent>) -> SubscriptionId {
        self.observers.observe(callback)
    }

    fn release(&self, subscription: SubscriptionId) {
        self.observers.release(subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmarks_stay_parallel_and_ordered() {
        let mut spline = ThinPlateSpline::new(SplineBasis::R);
        spline.append(DVec3::ZERO, DVec3::new(1.0, 0.0, 0.0));
        spline.append(DVec3::new(0.0, 2.0, 0.0), DVec3::new(0.0, 3.0, 0.0));

        assert_eq!(spline.len(), 2);
        assert_eq!(spline.source()[1], DVec3::new(0.0, 2.0, 0.0));
        assert_eq!(spline.target()[1], DVec3::new(0.0, 3.0, 0.0));
        assert_eq!(spline.displacement(0), Some(DVec3::new(1.0, 0.0, 0.0)));
        assert_eq!(spline.displacement(2), None);
    }

    #[test]
    fn set_spline_discards_accumulated_landmarks() {
        let warp = Warp::new("warp");
        warp.append_landmark(DVec3::ZERO, DVec3::ONE);
        warp.append_landmark(DVec3::ONE, DVec3::ZERO);
        assert_eq!(warp.landmark_count(), 2);

        warp.set_spline(ThinPlateSpline::new(SplineBasis::R));
        assert_eq!(warp.landmark_count(), 0);
        assert_eq!(warp.spline().unwrap().basis, SplineBasis::R);
    }

    #[test]
    fn append_without_spline_starts_a_fresh_one() {
        let warp = Warp::new("warp");
        assert!(warp.spline().is_none());

        warp.append_landmark(DVec3::ZERO, DVec3::ONE);
        assert_eq!(warp.landmark_count(), 1);
        assert_eq!(warp.spline().unwrap().basis, SplineBasis::R);
    }

    #[test]
    fn warp_is_a_non_linear_transform() {
        let warp = Warp::new("warp");
        assert!(!warp.is_world_linear());
        assert!(warp.world_matrix().is_none());
    }

    #[test]
    fn modification_reaches_observers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let warp = Warp::new("warp");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let subscription = warp.observe(Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        }));

        warp.mark_modified();
        warp.set_spline(ThinPlateSpline::default());
        assert_eq!(fired.load(Ordering::Relaxed), 2);

        warp.release(subscription);
        warp.mark_modified();
        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }
}
