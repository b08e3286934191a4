use std::sync::Arc;

use glam::DVec3;
use thiserror::Error;
use tracing::debug;

use crate::node::{RoiNode, WarpNode};
use crate::volume::Volume;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export spacing must be positive, got {0}")]
    InvalidSpacing(f64),
    #[error("region bounds are degenerate: {0:?}")]
    DegenerateBounds([f64; 6]),
}

/// Densifies a warp into a vector volume's voxels. The algorithm belongs to
/// the host platform; the export driver only prepares the grid.
pub trait FieldBuilder {
    fn build(&self, warp: &dyn WarpNode, target: &Volume);
}

/// Allocates a 3-component vector volume covering `roi` and hands it to
/// `builder` to fill with the warp's dense displacement field.
pub fn export_displacement_volume(
    warp: &dyn WarpNode,
    roi: &dyn RoiNode,
    spacing: f64,
    builder: &dyn FieldBuilder,
) -> Result<Arc<Volume>, ExportError> {
    if !(spacing > 0.0) {
        return Err(ExportError::InvalidSpacing(spacing));
    }
    let bounds = roi.world_bounds();
    if bounds[1] < bounds[0] || bounds[3] < bounds[2] || bounds[5] < bounds[4] {
        return Err(ExportError::DegenerateBounds(bounds));
    }

    let dims = [
        grid_len(bounds[1] - bounds[0], spacing),
        grid_len(bounds[3] - bounds[2], spacing),
        grid_len(bounds[5] - bounds[4], spacing),
    ];
    let origin = DVec3::new(bounds[0], bounds[2], bounds[4]);
    debug!(
        "exporting displacement field, {:?} voxels at spacing {}",
        dims, spacing
    );

    let volume = Volume::vector_field("displacement field", dims, origin, spacing);
    builder.build(warp, &volume);
    Ok(volume)
}

// one voxel per spacing step, padded so the far bound stays inside the grid
fn grid_len(extent: f64, spacing: f64) -> usize {
    ((extent + 1.0) / spacing).ceil() as usize
}

#[cfg(test)]
mod tests {
    use common::float_ext::FloatExt;

    use super::*;
    use crate::config::MappingConfig;
    use crate::node::VolumeNode;
    use crate::sampler::DriftMapper;
    use crate::scene::Roi;
    use crate::warp::Warp;

    struct RawBounds([f64; 6]);

    impl RoiNode for RawBounds {
        fn world_bounds(&self) -> [f64; 6] {
            self.0
        }
    }

    /// Stamps each landmark displacement into the voxel holding its source
    /// point, a stand-in for the host's dense resampler.
    struct LandmarkStampBuilder;

    impl FieldBuilder for LandmarkStampBuilder {
        fn build(&self, warp: &dyn WarpNode, target: &Volume) {
            let Some(spline) = warp.spline() else {
                return;
            };
            let ras_to_ijk = target.ijk_to_ras().inverse();
            let mut data = target.data();
            for index in 0..spline.len() {
                let ijk = ras_to_ijk.transform_point3(spline.source()[index]);
                data.set_vector(
                    ijk.x.round() as usize,
                    ijk.y.round() as usize,
                    ijk.z.round() as usize,
                    spline.displacement(index).unwrap(),
                );
            }
        }
    }

    #[test]
    fn grid_covers_the_region_at_fixed_spacing() -> anyhow::Result<()> {
        let warp = Warp::new("warp");
        let roi = Roi::from_bounds([0.0, 30.0, 0.0, 30.0, 0.0, 30.0]);

        let volume =
            export_displacement_volume(warp.as_ref(), &roi, 3.0, &LandmarkStampBuilder)?;

        // ceil(31 / 3) voxels per axis
        assert_eq!(volume.data().dims(), [11, 11, 11]);
        assert_eq!(volume.data().components(), 3);
        assert_eq!(volume.origin(), glam::DVec3::ZERO);
        assert!(volume.spacing().x.approximately_eq(3.0));
        assert!(volume.spacing().y.approximately_eq(3.0));
        assert!(volume.spacing().z.approximately_eq(3.0));
        Ok(())
    }

    #[test]
    fn origin_sits_at_the_minimum_corner() -> anyhow::Result<()> {
        let warp = Warp::new("warp");
        let roi = RawBounds([-9.0, 9.0, -6.0, 6.0, 0.0, 12.0]);

        let volume =
            export_displacement_volume(warp.as_ref(), &roi, 3.0, &LandmarkStampBuilder)?;

        assert_eq!(volume.origin(), glam::DVec3::new(-9.0, -6.0, 0.0));
        // extents 18, 12, 12 -> ceil(19/3), ceil(13/3), ceil(13/3)
        assert_eq!(volume.data().dims(), [7, 5, 5]);
        Ok(())
    }

    #[test]
    fn point_region_still_gets_one_voxel() -> anyhow::Result<()> {
        let warp = Warp::new("warp");
        let roi = RawBounds([5.0, 5.0, 5.0, 5.0, 5.0, 5.0]);

        let volume =
            export_displacement_volume(warp.as_ref(), &roi, 3.0, &LandmarkStampBuilder)?;

        assert_eq!(volume.data().dims(), [1, 1, 1]);
        Ok(())
    }

    #[test]
    fn invalid_spacing_is_rejected() {
        let warp = Warp::new("warp");
        let roi = Roi::from_bounds([0.0, 30.0, 0.0, 30.0, 0.0, 30.0]);

        let result = export_displacement_volume(warp.as_ref(), &roi, 0.0, &LandmarkStampBuilder);
        assert!(matches!(result, Err(ExportError::InvalidSpacing(_))));

        let result = export_displacement_volume(warp.as_ref(), &roi, -3.0, &LandmarkStampBuilder);
        assert!(matches!(result, Err(ExportError::InvalidSpacing(_))));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let warp = Warp::new("warp");
        let roi = RawBounds([10.0, 0.0, 0.0, 10.0, 0.0, 10.0]);

        let result = export_displacement_volume(warp.as_ref(), &roi, 3.0, &LandmarkStampBuilder);
        assert!(matches!(result, Err(ExportError::DegenerateBounds(_))));
    }

    #[test]
    fn builder_receives_the_allocated_grid() -> anyhow::Result<()> {
        let warp = Warp::new("warp");
        warp.append_landmark(
            glam::DVec3::new(3.0, 3.0, 3.0),
            glam::DVec3::new(4.0, 3.0, 3.0),
        );
        let roi = Roi::from_bounds([0.0, 30.0, 0.0, 30.0, 0.0, 30.0]);

        let volume =
            export_displacement_volume(warp.as_ref(), &roi, 3.0, &LandmarkStampBuilder)?;

        let data = volume.data();
        assert_eq!(data.get(1, 1, 1, 0), Some(1.0));
        assert_eq!(data.get(1, 1, 1, 1), Some(0.0));
        assert_eq!(data.get(1, 1, 1, 2), Some(0.0));
        Ok(())
    }

    #[test]
    fn mapper_export_uses_the_configured_spacing() -> anyhow::Result<()> {
        let warp = Warp::new("warp");
        let roi = Roi::from_bounds([0.0, 10.0, 0.0, 10.0, 0.0, 10.0]);

        let mut config = MappingConfig::default();
        config.export_spacing = 2.0;
        let mapper = DriftMapper::new(config);

        let volume = mapper.export(warp.as_ref(), &roi, &LandmarkStampBuilder)?;
        assert!(volume.spacing().x.approximately_eq(2.0));
        // ceil(11 / 2) per axis
        assert_eq!(volume.data().dims(), [6, 6, 6]);
        Ok(())
    }
}
