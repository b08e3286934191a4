use anyhow::bail;
use serde::{Deserialize, Serialize};

use common::{deserialize, serialize, FileFormat};

/// Tunables for a mapping session. All distances are in world units (mm for
/// the usual host setup).
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Minimum distance the mapped transform must travel from the last
    /// accepted sample before the next one is accepted.
    pub min_travel_distance: f64,
    /// Marker value written into the output volume at accepted positions.
    pub fill_value: f64,
    /// Isotropic voxel spacing of exported vector volumes.
    pub export_spacing: f64,
    /// Replace the output warp's spline with a fresh one on every start.
    /// Clearing this keeps accumulated landmarks across stop/start cycles.
    pub reset_warp_on_start: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            min_travel_distance: 15.0,
            fill_value: 1000.0,
            export_spacing: 3.0,
            reset_warp_on_start: true,
        }
    }
}

impl MappingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.min_travel_distance >= 0.0) {
            bail!(
                "min_travel_distance must be non-negative, got {}",
                self.min_travel_distance
            );
        }
        if !(self.export_spacing > 0.0) {
            bail!("export_spacing must be positive, got {}", self.export_spacing);
        }
        Ok(())
    }

    pub fn min_travel_squared(&self) -> f64 {
        self.min_travel_distance * self.min_travel_distance
    }

    pub fn to_yaml(&self) -> String {
        serialize(self, FileFormat::Yaml)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = deserialize(yaml, FileFormat::Yaml)?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_file(file_path: &str) -> anyhow::Result<Self> {
        let format = FileFormat::from_file_name(file_path)?;
        let text = std::fs::read_to_string(file_path)?;
        let config: Self = deserialize(&text, format)?;

        config.validate()?;

        Ok(config)
    }
}
