// THEORY:
// The `detection` module is the boundary between the engine and the external
// object detector/tracker. The engine never runs a model itself: it asks a
// `Detector` for the tracked objects of one frame and receives plain
// `Detection` records. Keeping that seam a trait lets any backend (an ONNX
// model with ByteTrack, a remote service, a replay file) drive the pipeline.
//
// It also owns the first geometric step of the pipeline: clamping a raw
// detection box into the frame and deriving the lower sub-region that is
// searched for stop lights.

use crate::config::DetectorConfig;
use crate::core_modules::candidate::Point;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Vehicle boxes smaller than this in either dimension are not searched.
pub const MIN_ROI_SIDE: u32 = 8;

/// One tracked object in one frame, as reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// [x1, y1, x2, y2] in frame pixel coordinates, unclamped.
    pub bbox: [f32; 4],
    pub track_id: i64,
    pub class_id: i64,
    pub confidence: f32,
}

impl Detection {
    /// Truncates the box to whole pixels and clamps it into a `width` x `height`
    /// frame. Returns `None` when nothing with positive area is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<VehicleBox> {
        if width == 0 || height == 0 {
            return None;
        }
        let [x1, y1, x2, y2] = self.bbox.map(|v| v as i64);

        let x1 = x1.max(0);
        let y1 = y1.max(0);
        let x2 = x2.min(width as i64 - 1);
        let y2 = y2.min(height as i64 - 1);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(VehicleBox {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        })
    }
}

/// A detection box clamped into the frame. The vehicle ROI spans columns
/// `x1..x2` and rows `y1..y2` (far edges exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// A rectangle inside the frame, in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl VehicleBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// True when the ROI is large enough to be searched for lights.
    pub fn is_searchable(&self) -> bool {
        self.width() >= MIN_ROI_SIDE && self.height() >= MIN_ROI_SIDE
    }

    /// The bottom `bottom_frac` of the ROI. Its top-left corner is the offset
    /// that maps mask coordinates back into the frame. `None` if no rows remain.
    pub fn lower_region(&self, bottom_frac: f64) -> Option<Region> {
        let height = self.height();
        let y_start = (height as f64 * (1.0 - bottom_frac)) as u32;
        if y_start >= height {
            return None;
        }
        Some(Region {
            x: self.x1,
            y: self.y1 + y_start,
            width: self.width(),
            height: height - y_start,
        })
    }
}

/// The external detector/tracker capability.
///
/// Implementations receive every frame exactly once, in order, and are
/// responsible for keeping `track_id` stable for the same physical object.
pub trait Detector {
    type Error: std::error::Error + Send + Sync + 'static;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    type Error = D::Error;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        (**self).detect(frame)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read detections")]
    Io(#[from] std::io::Error),
    #[error("invalid detections on line {line}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Replays pre-computed detections, one JSON array per line and per frame.
/// Blank lines are frames without detections. Frames past the last line get
/// no detections.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
    min_confidence: f32,
    /// Empty means every class is kept.
    classes: Vec<i64>,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames, ..Self::default() }
    }

    /// Applies the detector's confidence threshold and class list to every
    /// replayed frame, the way a live model would.
    pub fn with_config(mut self, config: &DetectorConfig) -> Self {
        self.min_confidence = config.confidence;
        self.classes = config.classes.clone();
        self
    }

    fn keeps(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence
            && (self.classes.is_empty() || self.classes.contains(&detection.class_id))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, ReplayError> {
        let mut frames = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                frames.push(Vec::new());
                continue;
            }
            let detections: Vec<Detection> = serde_json::from_str(&line)
                .map_err(|source| ReplayError::Parse { line: index + 1, source })?;
            frames.push(detections);
        }
        Ok(Self::new(frames))
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl Detector for ReplayDetector {
    type Error = Infallible;

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        let detections = match self.frames.get(self.cursor) {
            Some(frame) => frame.iter().filter(|d| self.keeps(d)).copied().collect(),
            None => Vec::new(),
        };
        self.cursor += 1;
        Ok(detections)
    }
}
