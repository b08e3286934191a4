use std::sync::{Arc, Weak};

use glam::{DMat4, DVec3};
use tracing::{debug, error, info, warn};

use common::{Shared, EPSILON};

use crate::config::MappingConfig;
use crate::export::{export_displacement_volume, ExportError, FieldBuilder};
use crate::node::{ModifiedEvent, RoiNode, SubscriptionId, TransformNode, VolumeNode, WarpNode};
use crate::volume::Volume;
use crate::warp::{SplineBasis, ThinPlateSpline};

/// Sampling tallies for the current session.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct SampleStats {
    pub accepted: u64,
    pub rejected: u64,
    pub skipped: u64,
}

struct SampleState {
    active: bool,
    ground_truth: Weak<dyn TransformNode>,
    mapped: Weak<dyn TransformNode>,
    volume: Option<Weak<dyn VolumeNode>>,
    warp: Option<Weak<dyn WarpNode>>,
    ras_to_ijk: Option<DMat4>,
    previous_mapped: Option<DVec3>,
    min_travel_squared: f64,
    fill_value: f64,
    stats: SampleStats,
}

struct AcceptedSample {
    ground_truth: DVec3,
    mapped: DVec3,
    displacement: DVec3,
    fill_value: f64,
    volume: Option<(Arc<dyn VolumeNode>, DMat4)>,
    warp: Option<Arc<dyn WarpNode>>,
}

impl SampleState {
    /// Guards, gates and bookkeeping, all under the session lock. Returns
    /// what the sinks need so they can run after the lock is released.
    fn accept_next(&mut self) -> Option<AcceptedSample> {
        if !self.active {
            return None;
        }

        // both references and both matrices are required before the gate so
        // a half-valid scene never advances the previous position
        let (Some(ground_truth), Some(mapped)) =
            (self.ground_truth.upgrade(), self.mapped.upgrade())
        else {
            self.stats.skipped += 1;
            return None;
        };
        let (Some(gt_matrix), Some(mapped_matrix)) =
            (ground_truth.world_matrix(), mapped.world_matrix())
        else {
            self.stats.skipped += 1;
            return None;
        };

        let mapped_position = mapped_matrix.w_axis.truncate();
        if let Some(previous) = self.previous_mapped {
            if previous.distance_squared(mapped_position) < self.min_travel_squared {
                self.stats.rejected += 1;
                return None;
            }
        }
        self.previous_mapped = Some(mapped_position);
        self.stats.accepted += 1;

        let gt_position = gt_matrix.w_axis.truncate();
        Some(AcceptedSample {
            ground_truth: gt_position,
            mapped: mapped_position,
            displacement: mapped_position - gt_position,
            fill_value: self.fill_value,
            volume: self
                .volume
                .as_ref()
                .and_then(|volume| volume.upgrade())
                .zip(self.ras_to_ijk),
            warp: self.warp.as_ref().and_then(|warp| warp.upgrade()),
        })
    }
}

/// One full sampling pass, invoked per modification notification on the
/// observed chain and once synthesized on start. The event payload does not
/// matter, every pass recomputes from the current scene.
fn run_sample(state: &Shared<SampleState>) {
    let Some(sample) = state.lock().accept_next() else {
        return;
    };
    debug!(
        "accepted sample at {:?}, drift {:?}",
        sample.ground_truth, sample.displacement
    );

    // sinks run without the session lock, a re-entrant notification gates on
    // the already-updated previous position
    if let Some((volume, ras_to_ijk)) = sample.volume {
        let ijk = ras_to_ijk.transform_point3(sample.ground_truth);
        volume.set_scalar(ijk.x as i32, ijk.y as i32, ijk.z as i32, 0, sample.fill_value);
        volume.mark_modified();
    }

    if let Some(warp) = sample.warp {
        warp.append_landmark(sample.ground_truth, sample.mapped);
        warp.mark_modified();
    }
}

/// RAS to IJK matrix for the session, parent-adjusted when possible.
fn cache_ras_to_ijk(volume: &dyn VolumeNode) -> Option<DMat4> {
    let mut ijk_to_ras = volume.ijk_to_ras();

    if let Some(parent) = volume.parent() {
        if parent.is_world_linear() {
            match parent.world_matrix() {
                Some(parent_world) => ijk_to_ras = parent_world * ijk_to_ras,
                None => warn!("parent transform matrix unavailable - skipping"),
            }
        } else {
            warn!("Cannot handle non-linear transforms - skipping");
        }
    }

    if ijk_to_ras.determinant().abs() < EPSILON {
        warn!("volume ijk-to-ras matrix is not invertible, volume painting disabled");
        return None;
    }
    Some(ijk_to_ras.inverse())
}

struct Session {
    state: Shared<SampleState>,
    subscriptions: Vec<(Weak<dyn TransformNode>, SubscriptionId)>,
}

impl Session {
    fn release_subscriptions(&mut self) -> usize {
        let mut released = 0;
        for (node, subscription) in self.subscriptions.drain(..) {
            if let Some(node) = node.upgrade() {
                node.release(subscription);
                released += 1;
            }
        }
        released
    }
}

/// Samples the divergence between a ground-truth transform and a mapped
/// transform on every modification of the ground-truth chain, painting
/// accepted samples into a volume and accumulating them as warp landmarks.
pub struct DriftMapper {
    config: MappingConfig,
    session: Option<Session>,
}

impl DriftMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .map_or(false, |session| session.state.lock().active)
    }

    /// Tallies of the current session, retained after `stop`.
    pub fn stats(&self) -> SampleStats {
        self.session
            .as_ref()
            .map_or_else(SampleStats::default, |session| session.state.lock().stats)
    }

    /// Begins a mapping session, superseding any previous one. Observes the
    /// whole parent chain of `ground_truth` and immediately performs one
    /// sampling pass so a sample exists at time zero.
    pub fn start(
        &mut self,
        ground_truth: Arc<dyn TransformNode>,
        mapped: Arc<dyn TransformNode>,
        output_volume: Option<Arc<dyn VolumeNode>>,
        output_warp: Option<Arc<dyn WarpNode>>,
    ) {
        self.stop();

        let ras_to_ijk = output_volume
            .as_ref()
            .and_then(|volume| cache_ras_to_ijk(volume.as_ref()));

        if let Some(warp) = &output_warp {
            if self.config.reset_warp_on_start || warp.spline().is_none() {
                warp.set_spline(ThinPlateSpline::new(SplineBasis::R));
            }
        }

        let state = Shared::new(SampleState {
            active: true,
            ground_truth: Arc::downgrade(&ground_truth),
            mapped: Arc::downgrade(&mapped),
            volume: output_volume.as_ref().map(Arc::downgrade),
            warp: output_warp.as_ref().map(Arc::downgrade),
            ras_to_ijk,
            previous_mapped: None,
            min_travel_squared: self.config.min_travel_squared(),
            fill_value: self.config.fill_value,
            stats: SampleStats::default(),
        });

        let state_for_callback = state.clone();
        let callback: Arc<ModifiedEvent> = Arc::new(move || run_sample(&state_for_callback));

        let mut subscriptions = Vec::new();
        // walk a clone so the caller's `ground_truth` stays alive through the
        // synthesized first pass below
        let mut cursor = Some(Arc::clone(&ground_truth));
        while let Some(node) = cursor {
            debug!("observing transform '{}'", node.name());
            let subscription = node.observe(Arc::clone(&callback));
            subscriptions.push((Arc::downgrade(&node), subscription));
            cursor = node.parent();
        }
        info!("mapping session started, observing {} transforms", subscriptions.len());

        self.session = Some(Session {
            state: state.clone(),
            subscriptions,
        });

        run_sample(&state);
    }

    /// Ends the session, releasing every subscription exactly once. The
    /// last session's sinks and tallies stay reachable. Safe to repeat.
    pub fn stop(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };

        let was_active = {
            let mut state = session.state.lock();
            let was_active = state.active;
            state.active = false;
            was_active
        };

        let released = session.release_subscriptions();
        if was_active {
            info!("mapping session stopped, released {} observers", released);
        }
    }

    /// Resamples `warp` into a fresh vector volume covering `roi`, using the
    /// configured export spacing.
    pub fn export(
        &self,
        warp: &dyn WarpNode,
        roi: &dyn RoiNode,
        builder: &dyn FieldBuilder,
    ) -> Result<Arc<Volume>, ExportError> {
        export_displacement_volume(warp, roi, self.config.export_spacing, builder)
    }
}

impl Default for DriftMapper {
    fn default() -> Self {
        Self::new(MappingConfig::default())
    }
}

impl Drop for DriftMapper {
    fn drop(&mut self) {
        if self.is_active() {
            error!("DriftMapper dropped while a session is active, releasing observers");
            self.stop();
        }
    }
}
