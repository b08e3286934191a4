use std::sync::Arc;

use glam::{DMat4, DVec3};
use hashbrown::HashMap;
use parking_lot::Mutex;

use common::id_type;

use crate::warp::ThinPlateSpline;

id_type!(NodeId);
id_type!(SubscriptionId);

/// Callback invoked when an observed node reports a modification.
pub trait ModifiedFn: Fn() + Send + Sync + 'static {}

impl<T> ModifiedFn for T where T: Fn() + Send + Sync + 'static {}

pub type ModifiedEvent = dyn ModifiedFn;

/// A node in the host transform hierarchy. References are non-owning on the
/// sampler side; the host creates, mutates and destroys nodes on its own.
pub trait TransformNode: Send + Sync {
    fn id(&self) -> NodeId;

    fn name(&self) -> String;

    /// Transform-to-world matrix, `None` while the chain up to the root
    /// cannot be expressed as a single linear matrix.
    fn world_matrix(&self) -> Option<DMat4>;

    fn parent(&self) -> Option<Arc<dyn TransformNode>>;

    /// True when this node and every ancestor applies a linear transform.
    fn is_world_linear(&self) -> bool;

    fn observe(&self, callback: Arc<ModifiedEvent>) -> SubscriptionId;

    fn release(&self, subscription: SubscriptionId);
}

/// A scalar voxel grid with an IJK (voxel index) to RAS (world) mapping.
pub trait VolumeNode: Send + Sync {
    fn ijk_to_ras(&self) -> DMat4;

    fn parent(&self) -> Option<Arc<dyn TransformNode>>;

    /// Writes one scalar component. Out-of-range indices are ignored.
    fn set_scalar(&self, i: i32, j: i32, k: i32, component: usize, value: f64);

    fn mark_modified(&self);
}

/// Axis-aligned region of interest in world space.
pub trait RoiNode: Send + Sync {
    /// Bounds as `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    fn world_bounds(&self) -> [f64; 6];
}

/// A node carrying a landmark-driven warp transform.
pub trait WarpNode: Send + Sync {
    /// Replaces the node's spline, discarding any accumulated landmarks.
    fn set_spline(&self, spline: ThinPlateSpline);

    fn spline(&self) -> Option<ThinPlateSpline>;

    /// Appends one source/target landmark pair to the current spline.
    fn append_landmark(&self, source: DVec3, target: DVec3);

    fn landmark_count(&self) -> usize;

    fn mark_modified(&self);
}

/// Subscriber registry backing `observe`/`release` on the in-memory nodes.
#[derive(Default)]
pub struct Observers {
    subscribers: Mutex<HashMap<SubscriptionId, Arc<ModifiedEvent>>>,
}

impl Observers {
    pub fn observe(&self, callback: Arc<ModifiedEvent>) -> SubscriptionId {
        let subscription = SubscriptionId::unique();
        self.subscribers.lock().insert(subscription, callback);
        subscription
    }

    pub fn release(&self, subscription: SubscriptionId) -> bool {
        self.subscribers.lock().remove(&subscription).is_some()
    }

    pub fn count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Invokes every subscriber. Callbacks run outside the registry lock so
    /// they may observe, release or notify again without deadlocking.
    pub fn notify(&self) {
        let callbacks: Vec<Arc<ModifiedEvent>> =
            self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}
