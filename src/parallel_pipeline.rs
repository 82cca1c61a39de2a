// THEORY:
// `ParallelPipeline` produces exactly the frames `FramePipeline` produces, but
// spreads the expensive part of a frame, the per-vehicle mask and blob search,
// over tokio's blocking thread pool.
//
// Key architectural principles:
// 1.  **Frames Stay In Order**: Frames are still processed one after another.
//     Only the detections inside one frame run concurrently.
// 2.  **Bounded Fan-Out**: A semaphore sized from the number of CPUs caps how
//     many searches run at once, so a crowded frame cannot flood the pool.
// 3.  **Shared State Stays Home**: Workers get an `Arc` of the frame and a copy
//     of the scan settings. Trails, overlay and the last mask are updated on the
//     driving task after every worker has reported back.

use crate::config::PipelineConfig;
use crate::core_modules::detection::Detector;
use crate::core_modules::frame_io::{FrameSink, FrameSource};
use crate::core_modules::trail::TrailManager;
use crate::core_modules::vehicle_scan::{self, ScanSettings, VehicleAnalysis};
use crate::error::{Result, VisionError};
use crate::pipeline::{font_for, FrameReport, FrameState, RunSummary};
use ab_glyph::FontArc;
use futures::future::join_all;
use image::{GrayImage, RgbImage};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub struct ParallelPipeline<D: Detector> {
    config: PipelineConfig,
    settings: ScanSettings,
    detector: D,
    font: Option<FontArc>,
    state: FrameState,
    permits: Arc<Semaphore>,
}

impl<D: Detector> ParallelPipeline<D> {
    pub fn new(config: PipelineConfig, detector: D) -> Result<Self> {
        config.validate()?;
        let font = font_for(&config)?;
        Ok(Self::with_font(config, detector, Some(font)))
    }

    pub fn with_font(config: PipelineConfig, detector: D, font: Option<FontArc>) -> Self {
        Self::with_workers(config, detector, font, num_cpus::get())
    }

    /// Caps concurrent vehicle searches at `workers` (at least one).
    pub fn with_workers(
        config: PipelineConfig,
        detector: D,
        font: Option<FontArc>,
        workers: usize,
    ) -> Self {
        Self {
            settings: ScanSettings::from_config(&config),
            state: FrameState::new(&config),
            config,
            detector,
            font,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn trails(&self) -> &TrailManager {
        &self.state.trails
    }

    pub fn last_mask(&self) -> Option<&GrayImage> {
        self.state.last_mask.as_ref()
    }

    pub async fn process_frame(&mut self, frame: RgbImage) -> Result<(RgbImage, FrameReport)> {
        let frame_index = self.state.frame_index;
        let detections = self
            .detector
            .detect(&frame)
            .map_err(|source| VisionError::DetectorFailure {
                frame_index,
                source: Box::new(source),
            })?;

        let frame = Arc::new(frame);
        let searches = detections.into_iter().map(|detection| {
            let frame = Arc::clone(&frame);
            let permits = Arc::clone(&self.permits);
            let settings = self.settings;
            async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                tokio::task::spawn_blocking(move || {
                    vehicle_scan::scan_vehicle(&frame, &detection, &settings)
                })
                .await
            }
        });

        let mut analyses: Vec<VehicleAnalysis> = Vec::new();
        for outcome in join_all(searches).await {
            if let Some(analysis) = outcome? {
                analyses.push(analysis);
            }
        }

        Ok(self
            .state
            .annotate(&frame, analyses, &self.config, self.font.as_ref()))
    }

    /// Same contract as `FramePipeline::run`: the sink is finished exactly once.
    pub async fn run<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        info!(
            "Starting parallel run with {} workers",
            self.permits.available_permits()
        );
        let outcome = self.drive(source, sink).await;
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

    async fn drive<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        while let Some(frame) = source.next_frame()? {
            let (output, report) = self.process_frame(frame).await?;
            sink.write(&output)?;
            summary.add(&report);
        }
        Ok(summary)
    }
}
