// THEORY:
// The `pipeline` module is the top-level API of the engine. A `FramePipeline`
// owns the configuration, the detector, the trail store and the optional label
// font, and turns one input frame into one annotated output frame.
//
// Key architectural principles:
// 1.  **One Frame At A Time**: `process_frame` is synchronous and frames never
//     overlap. Every detection of a frame is analyzed and drawn before the
//     frame is handed back.
// 2.  **Trails Before Drawing**: Centroids are recorded for every surviving
//     detection before the overlay is composed, so the current position is
//     already part of the drawn trail.
// 3.  **Pure Core, Thin Shell**: Mask building, blob extraction and overlay
//     planning are pure functions in `core_modules`. This module only sequences
//     them and owns the state that must outlive a frame.
// 4.  **Clean Shutdown**: `run` calls the sink's `finish` exactly once, whether
//     the source ran dry or a fatal error stopped the run.

use crate::config::PipelineConfig;
use crate::core_modules::frame_io::{FrameSink, FrameSource};
use crate::core_modules::overlay;
use crate::core_modules::trail::TrailManager;
use crate::core_modules::vehicle_scan::{self, ScanSettings};
use crate::error::{Result, VisionError};
use ab_glyph::FontArc;
use image::{GrayImage, RgbImage};
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::candidate::{Point, StopLightBox};
pub use crate::core_modules::detection::{Detection, Detector, VehicleBox};
pub use crate::core_modules::overlay::{DrawOp, OverlayPlan};
pub use crate::core_modules::vehicle_scan::{LightScan, SkipReason, VehicleAnalysis};

/// What happened in one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Detections that survived clamping and were drawn.
    pub vehicles: usize,
    pub stop_lights: usize,
    /// Vehicles drawn without a light search.
    pub skipped: usize,
}

/// Totals over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub vehicles: u64,
    pub stop_lights: u64,
}

impl RunSummary {
    pub fn add(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.vehicles += report.vehicles as u64;
        self.stop_lights += report.stop_lights as u64;
    }
}

/// Builds the trail store described by `config`.
pub fn trail_manager_for(config: &PipelineConfig) -> TrailManager {
    match config.trail_max_idle_frames {
        Some(max_idle) => TrailManager::with_eviction(config.trail_len, max_idle),
        None => TrailManager::new(config.trail_len),
    }
}

/// Loads the label font: the configured `font_path` if set, the embedded
/// font otherwise.
pub fn font_for(config: &PipelineConfig) -> Result<FontArc> {
    match &config.font_path {
        Some(path) => overlay::load_font(path),
        None => overlay::embedded_font(),
    }
}

/// State that survives from one frame to the next, shared by both pipelines.
#[derive(Debug)]
pub(crate) struct FrameState {
    pub(crate) trails: TrailManager,
    pub(crate) last_mask: Option<GrayImage>,
    pub(crate) frame_index: u64,
}

impl FrameState {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        Self {
            trails: trail_manager_for(config),
            last_mask: None,
            frame_index: 0,
        }
    }

    /// Records trails, composes and renders the overlay, and closes the frame.
    pub(crate) fn annotate(
        &mut self,
        frame: &RgbImage,
        analyses: Vec<VehicleAnalysis>,
        config: &PipelineConfig,
        font: Option<&FontArc>,
    ) -> (RgbImage, FrameReport) {
        let mut report = FrameReport {
            frame_index: self.frame_index,
            ..FrameReport::default()
        };

        for analysis in &analyses {
            self.trails
                .record(analysis.detection.track_id, analysis.vehicle.centroid());
            report.vehicles += 1;
            match &analysis.scan {
                LightScan::Scanned(lights) => report.stop_lights += lights.len(),
                LightScan::Skipped(_) => report.skipped += 1,
            }
        }

        let plan = overlay::compose(&analyses, &self.trails, config);
        let mut output = frame.clone();
        overlay::render(&mut output, &plan, font);

        // The last vehicle of the frame decides, even when it was not searched.
        if let Some(last) = analyses.into_iter().last() {
            self.last_mask = last.mask;
        }

        self.trails.end_frame();
        self.frame_index += 1;
        debug!(
            frame = report.frame_index,
            vehicles = report.vehicles,
            stop_lights = report.stop_lights,
            skipped = report.skipped,
            "frame annotated"
        );
        (output, report)
    }
}

/// The main, top-level struct for the engine.
pub struct FramePipeline<D: Detector> {
    config: PipelineConfig,
    settings: ScanSettings,
    detector: D,
    font: Option<FontArc>,
    state: FrameState,
}

impl<D: Detector> FramePipeline<D> {
    /// Validates `config` and loads the label font it names.
    pub fn new(config: PipelineConfig, detector: D) -> Result<Self> {
        config.validate()?;
        let font = font_for(&config)?;
        Ok(Self::with_font(config, detector, Some(font)))
    }

    /// Like `new`, but with an already loaded font (or none). `font_path` is
    /// ignored.
    pub fn with_font(config: PipelineConfig, detector: D, font: Option<FontArc>) -> Self {
        Self {
            settings: ScanSettings::from_config(&config),
            state: FrameState::new(&config),
            config,
            detector,
            font,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn trails(&self) -> &TrailManager {
        &self.state.trails
    }

    /// The mask of the most recently drawn vehicle. `None` when that vehicle
    /// was too small to search, and always `None` unless `keep_last_mask` is set.
    pub fn last_mask(&self) -> Option<&GrayImage> {
        self.state.last_mask.as_ref()
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.state.frame_index
    }

    /// Runs detection, light search, trail update and overlay for one frame.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<(RgbImage, FrameReport)> {
        let frame_index = self.state.frame_index;
        let detections = self
            .detector
            .detect(frame)
            .map_err(|source| VisionError::DetectorFailure {
                frame_index,
                source: Box::new(source),
            })?;

        let analyses: Vec<VehicleAnalysis> = detections
            .iter()
            .filter_map(|detection| vehicle_scan::scan_vehicle(frame, detection, &self.settings))
            .collect();

        Ok(self
            .state
            .annotate(frame, analyses, &self.config, self.font.as_ref()))
    }

    /// Drives the pipeline until `source` is exhausted or a fatal error occurs.
    /// The sink is finished exactly once in both cases.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        info!("Starting run");
        let outcome = self.drive(source, sink);
        let finished = sink.finish();

        let summary = match outcome {
            Ok(summary) => summary,
            Err(err) => {
                if let Err(finish_err) = finished {
                    warn!("Sink failed to finish after an earlier error: {finish_err}");
                }
                return Err(err);
            }
        };
        finished?;

        info!(
            "Run complete: {} frames, {} vehicles, {} stop lights",
            summary.frames, summary.vehicles, summary.stop_lights
        );
        Ok(summary)
    }

    fn drive<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        while let Some(frame) = source.next_frame()? {
            let (output, report) = self.process_frame(&frame)?;
            sink.write(&output)?;
            summary.add(&report);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::ReplayDetector;
    use crate::core_modules::overlay::{LIGHT_COLOR, TRAIL_COLOR, VEHICLE_COLOR};
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const ROAD: Rgb<u8> = Rgb([70, 70, 75]);
    const BODY: Rgb<u8> = Rgb([40, 40, 120]);
    const LAMP: Rgb<u8> = Rgb([230, 25, 20]);

    fn car(track_id: i64, bbox: [f32; 4]) -> Detection {
        Detection { bbox, track_id, class_id: 2, confidence: 0.9 }
    }

    /// A 320x240 frame with one car body at (100,80)-(220,180) and a 14x10
    /// lamp at (110,160).
    fn car_frame() -> RgbImage {
        let mut frame = RgbImage::from_pixel(320, 240, ROAD);
        draw_filled_rect_mut(&mut frame, Rect::at(100, 80).of_size(120, 100), BODY);
        draw_filled_rect_mut(&mut frame, Rect::at(110, 160).of_size(14, 10), LAMP);
        frame
    }

    #[derive(Debug, thiserror::Error)]
    #[error("model crashed")]
    struct Crash;

    /// Fails on a given frame, returns nothing otherwise.
    struct CrashOn(u64, u64);

    impl Detector for CrashOn {
        type Error = Crash;

        fn detect(&mut self, _frame: &RgbImage) -> std::result::Result<Vec<Detection>, Crash> {
            let index = self.1;
            self.1 += 1;
            if index == self.0 { Err(Crash) } else { Ok(Vec::new()) }
        }
    }

    /// Counts every call the pipeline makes.
    #[derive(Default)]
    struct CountingSink {
        written: usize,
        finished: usize,
    }

    impl FrameSink for CountingSink {
        fn write(&mut self, _frame: &RgbImage) -> Result<()> {
            self.written += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished += 1;
            Ok(())
        }
    }

    #[test]
    fn finds_the_lamp_and_draws_everything() {
        let detector = ReplayDetector::new(vec![vec![car(1, [100.0, 80.0, 220.0, 180.0])]]);
        let mut pipeline = FramePipeline::with_font(PipelineConfig::default(), detector, None);

        let frame = car_frame();
        let (output, report) = pipeline.process_frame(&frame).expect("frame");

        assert_eq!(report, FrameReport { frame_index: 0, vehicles: 1, stop_lights: 1, skipped: 0 });
        assert_eq!(*output.get_pixel(100, 80), VEHICLE_COLOR);
        assert_eq!(*output.get_pixel(110, 165), LIGHT_COLOR);
        // The input is left untouched.
        assert_eq!(*frame.get_pixel(100, 80), BODY);
    }

    #[test]
    fn empty_frame_is_passed_through_unchanged() {
        let mut pipeline =
            FramePipeline::with_font(PipelineConfig::default(), ReplayDetector::default(), None);
        let frame = car_frame();
        let (output, report) = pipeline.process_frame(&frame).expect("frame");
        assert_eq!(output, frame);
        assert_eq!(report.vehicles, 0);
    }

    #[test]
    fn degenerate_detection_is_not_drawn() {
        let detector = ReplayDetector::new(vec![vec![car(1, [400.0, 10.0, 500.0, 60.0])]]);
        let config = PipelineConfig { trail_len: 5, ..PipelineConfig::default() };
        let mut pipeline = FramePipeline::with_font(config, detector, None);

        let frame = car_frame();
        let (output, report) = pipeline.process_frame(&frame).expect("frame");
        assert_eq!(output, frame);
        assert_eq!(report.vehicles, 0);
        assert_eq!(pipeline.trails().track_count(), 0);
    }

    #[test]
    fn small_vehicle_is_drawn_but_not_searched() {
        let detector = ReplayDetector::new(vec![vec![car(3, [10.0, 10.0, 16.0, 40.0])]]);
        let config = PipelineConfig { keep_last_mask: true, ..PipelineConfig::default() };
        let mut pipeline = FramePipeline::with_font(config, detector, None);

        let (output, report) = pipeline.process_frame(&car_frame()).expect("frame");
        assert_eq!(report.skipped, 1);
        assert_eq!(*output.get_pixel(10, 10), VEHICLE_COLOR);
        assert!(pipeline.last_mask().is_none());
    }

    #[test]
    fn trails_follow_the_centroid_and_are_drawn() {
        let frames = vec![
            vec![car(7, [100.0, 80.0, 140.0, 120.0])],
            vec![car(7, [140.0, 80.0, 180.0, 120.0])],
            vec![car(7, [180.0, 80.0, 220.0, 120.0])],
        ];
        let config = PipelineConfig { trail_len: 2, ..PipelineConfig::default() };
        let mut pipeline = FramePipeline::with_font(config, ReplayDetector::new(frames), None);

        let blank = RgbImage::from_pixel(320, 240, ROAD);
        let (first, _) = pipeline.process_frame(&blank).expect("frame 0");
        // A single point is not a trail yet.
        assert_eq!(*first.get_pixel(120, 100), ROAD);

        let (second, _) = pipeline.process_frame(&blank).expect("frame 1");
        assert_eq!(*second.get_pixel(130, 100), TRAIL_COLOR);

        pipeline.process_frame(&blank).expect("frame 2");
        assert_eq!(
            pipeline.trails().trail_for(7),
            vec![Point::new(160, 100), Point::new(200, 100)]
        );
    }

    #[test]
    fn keeps_the_last_mask_when_asked() {
        let detector = ReplayDetector::new(vec![vec![car(1, [100.0, 80.0, 220.0, 180.0])]]);
        let config = PipelineConfig { keep_last_mask: true, ..PipelineConfig::default() };
        let mut pipeline = FramePipeline::with_font(config, detector, None);

        pipeline.process_frame(&car_frame()).expect("frame");
        let mask = pipeline.last_mask().expect("mask kept");
        // y_start = floor(100 * 0.55) = 55
        assert_eq!(mask.dimensions(), (120, 45));
    }

    #[test]
    fn skipped_last_vehicle_clears_the_mask() {
        let frames = vec![
            vec![car(1, [100.0, 80.0, 220.0, 180.0])],
            Vec::new(),
            vec![car(1, [100.0, 80.0, 220.0, 180.0]), car(2, [10.0, 10.0, 16.0, 40.0])],
        ];
        let config = PipelineConfig { keep_last_mask: true, ..PipelineConfig::default() };
        let mut pipeline = FramePipeline::with_font(config, ReplayDetector::new(frames), None);

        pipeline.process_frame(&car_frame()).expect("frame 0");
        assert!(pipeline.last_mask().is_some());

        // A frame without vehicles leaves the mask as it was.
        pipeline.process_frame(&car_frame()).expect("frame 1");
        assert!(pipeline.last_mask().is_some());

        pipeline.process_frame(&car_frame()).expect("frame 2");
        assert!(pipeline.last_mask().is_none());
    }

    #[test]
    fn default_pipeline_draws_vehicle_labels() {
        let detector = ReplayDetector::new(vec![vec![car(1, [100.0, 80.0, 220.0, 180.0])]]);
        let mut pipeline =
            FramePipeline::new(PipelineConfig::default(), detector).expect("embedded font");

        let frame = car_frame();
        let (output, _) = pipeline.process_frame(&frame).expect("frame");

        // The label baseline is 6 px above the box; the glyphs sit above it.
        let changed = (50..75)
            .flat_map(|y| (100..220).map(move |x| (x, y)))
            .filter(|&(x, y)| output.get_pixel(x, y) != frame.get_pixel(x, y))
            .count();
        assert!(changed > 50, "label pixels: {changed}");
    }

    #[test]
    fn detector_failure_is_fatal_and_the_sink_is_finished_once() {
        let mut pipeline =
            FramePipeline::with_font(PipelineConfig::default(), CrashOn(2, 0), None);
        let mut source = vec![car_frame(); 5].into_iter();
        let mut sink = CountingSink::default();

        match pipeline.run(&mut source, &mut sink) {
            Err(VisionError::DetectorFailure { frame_index, .. }) => assert_eq!(frame_index, 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(sink.written, 2);
        assert_eq!(sink.finished, 1);
    }

    #[test]
    fn run_reports_totals_and_finishes_once() {
        let frames = vec![
            vec![car(1, [100.0, 80.0, 220.0, 180.0])],
            Vec::new(),
            vec![car(1, [100.0, 80.0, 220.0, 180.0])],
        ];
        let mut pipeline =
            FramePipeline::with_font(PipelineConfig::default(), ReplayDetector::new(frames), None);
        let mut source = vec![car_frame(); 3].into_iter();
        let mut sink = CountingSink::default();

        let summary = pipeline.run(&mut source, &mut sink).expect("run");
        assert_eq!(summary, RunSummary { frames: 3, vehicles: 2, stop_lights: 2 });
        assert_eq!((sink.written, sink.finished), (3, 1));
        assert_eq!(pipeline.frames_processed(), 3);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = PipelineConfig { bottom_frac: 0.0, ..PipelineConfig::default() };
        assert!(matches!(
            FramePipeline::new(config, ReplayDetector::default()),
            Err(VisionError::InvalidConfig(_))
        ));
    }
}
