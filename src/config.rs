// THEORY:
// `PipelineConfig` carries every tunable threshold of the engine. It can be
// built in code (`PipelineConfig::default()` plus field overrides) or loaded
// from a YAML file where every key is optional. The detector section is opaque
// to the engine: it is handed to whichever `Detector` backend is in use.

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// COCO ids for the classes the runner asks the detector for:
/// person, bicycle, car, motorcycle, bus, truck.
pub const DEFAULT_VEHICLE_CLASSES: [i64; 6] = [0, 1, 2, 3, 5, 7];

/// Options forwarded untouched to the external detector/tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence: f32,
    pub model: String,
    pub tracker: String,
    pub classes: Vec<i64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            model: "yolo12n.pt".to_string(),
            tracker: "bytetrack.yaml".to_string(),
            classes: DEFAULT_VEHICLE_CLASSES.to_vec(),
        }
    }
}

/// Configuration for the `FramePipeline`, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fraction of the vehicle box height, measured from the bottom edge, that
    /// is searched for lights. Must lie in (0, 1].
    pub bottom_frac: f64,
    pub s_min: u8,
    pub v_min: u8,
    pub min_area: u32,
    /// Upper blob area bound as a fraction of the analyzed sub-region's pixels.
    pub max_area_frac: f64,
    pub min_solidity: f64,
    /// Trail capacity per track id. Zero or negative disables trails.
    pub trail_len: i64,
    /// Drop trails of ids not seen for this many frames. `None` keeps them for
    /// the whole run.
    pub trail_max_idle_frames: Option<u64>,
    pub detector: DetectorConfig,
    pub class_names: HashMap<i64, String>,
    pub font_path: Option<PathBuf>,
    pub keep_last_mask: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bottom_frac: 0.45,
            s_min: 85,
            v_min: 70,
            min_area: 60,
            max_area_frac: 0.08,
            min_solidity: 0.35,
            trail_len: 0,
            trail_max_idle_frames: None,
            detector: DetectorConfig::default(),
            class_names: default_class_names(),
            font_path: None,
            keep_last_mask: false,
        }
    }
}

fn default_class_names() -> HashMap<i64, String> {
    [
        (0, "person"),
        (1, "bicycle"),
        (2, "car"),
        (3, "motorcycle"),
        (5, "bus"),
        (7, "truck"),
    ]
    .into_iter()
    .map(|(id, name)| (id, name.to_string()))
    .collect()
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| VisionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bottom_frac > 0.0 && self.bottom_frac <= 1.0) {
            return Err(VisionError::InvalidConfig(format!(
                "bottom_frac must be in (0, 1], got {}",
                self.bottom_frac
            )));
        }
        if !(self.max_area_frac > 0.0 && self.max_area_frac <= 1.0) {
            return Err(VisionError::InvalidConfig(format!(
                "max_area_frac must be in (0, 1], got {}",
                self.max_area_frac
            )));
        }
        if !(0.0..=1.0).contains(&self.min_solidity) {
            return Err(VisionError::InvalidConfig(format!(
                "min_solidity must be in [0, 1], got {}",
                self.min_solidity
            )));
        }
        Ok(())
    }

    pub fn trails_enabled(&self) -> bool {
        self.trail_len > 0
    }

    /// Label text for a class id; unknown ids fall back to the number itself.
    pub fn class_name(&self, class_id: i64) -> String {
        self.class_names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }
}
