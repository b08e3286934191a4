use glam::{DMat4, DVec3};
use tracing::info;

use common::log_setup::setup_logging;
use driftmap::config::MappingConfig;
use driftmap::export::FieldBuilder;
use driftmap::node::{VolumeNode, WarpNode};
use driftmap::sampler::DriftMapper;
use driftmap::scene::{LinearTransform, Roi};
use driftmap::volume::Volume;
use driftmap::warp::Warp;

/// Stamps each landmark displacement into the voxel holding its source point.
/// A real host densifies the spline over the whole grid instead.
struct StampBuilder;

impl FieldBuilder for StampBuilder {
    fn build(&self, warp: &dyn WarpNode, target: &Volume) {
        let Some(spline) = warp.spline() else {
            return;
        };
        let ras_to_ijk = target.ijk_to_ras().inverse();
        let mut data = target.data();
        for index in 0..spline.len() {
            let ijk = ras_to_ijk.transform_point3(spline.source()[index]);
            if let Some(displacement) = spline.displacement(index) {
                data.set_vector(
                    ijk.x.round() as usize,
                    ijk.y.round() as usize,
                    ijk.z.round() as usize,
                    displacement,
                );
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    setup_logging("info");

    let config = MappingConfig::from_yaml("min_travel_distance: 10.0\nfill_value: 500.0\n")?;

    let tracker = LinearTransform::new("tracker mount");
    let ground_truth = LinearTransform::new("ground truth sensor");
    ground_truth.set_parent(Some(tracker.clone()))?;
    let mapped = LinearTransform::new("mapped sensor");

    let volume = Volume::new("visited positions", [64, 64, 64], 1, DMat4::IDENTITY);
    let warp = Warp::new("drift warp");

    let mut mapper = DriftMapper::new(config);
    mapper.start(
        ground_truth.clone(),
        mapped.clone(),
        Some(volume.clone()),
        Some(warp.clone()),
    );

    // sweep along x in 3mm steps while the mapped pose drifts sideways, the
    // travel gate thins this down to roughly every fourth step
    for step in 0..=20 {
        let t = step as f64 * 3.0;
        let truth = DVec3::new(t, 0.0, 0.0);
        let drift = DVec3::new(0.0, t * 0.05, 0.0);
        mapped.set_translation(truth + drift);
        ground_truth.set_translation(truth);
    }

    // moving the mount is picked up too, the whole chain is observed
    mapped.set_translation(DVec3::new(60.0, 20.0, 0.0));
    tracker.set_translation(DVec3::new(0.0, 0.0, 5.0));

    mapper.stop();
    let stats = mapper.stats();
    info!(
        "sampling done, accepted {} rejected {} skipped {}",
        stats.accepted, stats.rejected, stats.skipped
    );

    let roi = Roi::new(DVec3::new(30.0, 0.0, 0.0), DVec3::new(30.0, 25.0, 10.0));
    let field = mapper.export(warp.as_ref(), &roi, &StampBuilder)?;
    info!(
        "exported '{}', {:?} voxels at spacing {}",
        field.name(),
        field.data().dims(),
        field.spacing().x
    );

    Ok(())
}
