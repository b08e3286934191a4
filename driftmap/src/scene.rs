use std::sync::Arc;

use glam::{DMat4, DVec3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{ModifiedEvent, NodeId, Observers, RoiNode, SubscriptionId, TransformNode};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("transform parent cycle through node '{0}'")]
    ParentCycle(String),
}

/// Walks `parent` up to the root and errors when `child` appears in the
/// chain, which would make the hierarchy cyclic.
pub(crate) fn ensure_no_cycle(
    child: NodeId,
    child_name: &str,
    parent: &Arc<dyn TransformNode>,
) -> Result<(), SceneError> {
    let mut cursor = Some(Arc::clone(parent));
    while let Some(node) = cursor {
        if node.id() == child {
            return Err(SceneError::ParentCycle(child_name.to_string()));
        }
        cursor = node.parent();
    }
    Ok(())
}

struct TransformState {
    local: DMat4,
    parent: Option<Arc<dyn TransformNode>>,
}

/// In-memory transform node holding a 4x4 linear transform to its parent.
pub struct LinearTransform {
    id: NodeId,
    name: String,
    state: Mutex<TransformState>,
    observers: Observers,
}

impl LinearTransform {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_matrix(name, DMat4::IDENTITY)
    }

    pub fn with_translation(name: impl Into<String>, translation: DVec3) -> Arc<Self> {
        Self::with_matrix(name, DMat4::from_translation(translation))
    }

    pub fn with_matrix(name: impl Into<String>, local: DMat4) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::unique(),
            name: name.into(),
            state: Mutex::new(TransformState {
                local,
                parent: None,
            }),
            observers: Observers::default(),
        })
    }

    pub fn local_matrix(&self) -> DMat4 {
        self.state.lock().local
    }

    pub fn set_local_matrix(&self, local: DMat4) {
        self.state.lock().local = local;
        self.observers.notify();
    }

    pub fn set_translation(&self, translation: DVec3) {
        self.set_local_matrix(DMat4::from_translation(translation));
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

impl TransformNode for LinearTransform {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn world_matrix(&self) -> Option<DMat4> {
        // snapshot before walking up, the parent takes its own lock
        let (local, parent) = {
            let state = self.state.lock();
            (state.local, state.parent.clone())
        };
        match parent {
            None => Some(local),
            Some(parent) => parent.world_matrix().map(|world| world * local),
        }
    }

    fn parent(&self) -> Option<Arc<dyn TransformNode>> {
        self.state.lock().parent.clone()
    }

    fn is_world_linear(&self) -> bool {
        let parent = self.state.lock().parent.clone();
        parent.map_or(true, |parent| parent.is_world_linear())
    }

    fn observe(&self, callback: Arc<ModifiedEvent>) -> SubscriptionId {
        self.observers.observe(callback)
    }

    fn release(&self, subscription: SubscriptionId) {
        self.observers.release(subscription);
    }
}

/// Axis-aligned region of interest, center plus half-extents.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Roi {
    pub center: DVec3,
    pub radius: DVec3,
}

impl Roi {
    pub fn new(center: DVec3, radius: DVec3) -> Self {
        Self { center, radius }
    }

    pub fn from_bounds(bounds: [f64; 6]) -> Self {
        let min = DVec3::new(bounds[0], bounds[2], bounds[4]);
        let max = DVec3::new(bounds[1], bounds[3], bounds[5]);
        Self {
            center: (min + max) * 0.5,
            radius: (max - min) * 0.5,
        }
    }
}

impl RoiNode for Roi {
    fn world_bounds(&self) -> [f64; 6] {
        let min = self.center - self.radius;
        let max = self.center + self.radius;
        [min.x, max.x, min.y, max.y, min.z, max.z]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::float_ext::FloatExt;

    use super::*;
    use crate::warp::Warp;

    #[test]
    fn world_matrix_composes_parent_chain() {
        let root = LinearTransform::with_translation("root", DVec3::new(10.0, 0.0, 0.0));
        let child = LinearTransform::with_translation("child", DVec3::new(0.0, 5.0, 0.0));
        child.set_parent(Some(root)).unwrap();

        let world = child.world_matrix().unwrap();
        let position = world.w_axis.truncate();
        assert!(position.x.approximately_eq(10.0));
        assert!(position.y.approximately_eq(5.0));
        assert!(position.z.approximately_eq(0.0));
    }

    #[test]
    fn non_linear_ancestor_poisons_the_chain() {
        let warp = Warp::new("warp");
        let child = LinearTransform::new("child");
        child.set_parent(Some(warp)).unwrap();

        assert!(!child.is_world_linear());
        assert!(child.world_matrix().is_none());
    }

    #[test]
    fn parent_cycles_are_rejected() {
        let a = LinearTransform::new("a");
        let b = LinearTransform::new("b");
        b.set_parent(Some(a.clone())).unwrap();

        let result = a.set_parent(Some(b));
        assert!(matches!(result, Err(SceneError::ParentCycle(_))));

        let result = a.set_parent(Some(a.clone()));
        assert!(matches!(result, Err(SceneError::ParentCycle(_))));
    }

    #[test]
    fn mutations_notify_observers() {
        let transform = LinearTransform::new("probe");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let subscription = transform.observe(Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        }));

        transform.set_translation(DVec3::ONE);
        transform.set_local_matrix(DMat4::IDENTITY);
        transform.set_parent(None).unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 3);

        transform.release(subscription);
        transform.set_translation(DVec3::ZERO);
        assert_eq!(fired.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn roi_bounds_roundtrip() {
        let bounds = [0.0, 30.0, -10.0, 10.0, 5.0, 8.0];
        let roi = Roi::from_bounds(bounds);
        let out = roi.world_bounds();
        for (a, b) in bounds.iter().zip(out.iter()) {
            assert!(a.approximately_eq(*b));
        }
    }
}
