// THEORY:
// `stoplight_runner` runs the engine over a directory of frames with detections
// replayed from a JSON-lines file, and writes the annotated frames to another
// directory. It is the smallest end-to-end consumer of the library.

use anyhow::{bail, Context, Result};
use stoplight_vision::config::PipelineConfig;
use stoplight_vision::core_modules::detection::ReplayDetector;
use stoplight_vision::core_modules::frame_io::{ImageSequenceSink, ImageSequenceSource};
use stoplight_vision::parallel_pipeline::ParallelPipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: stoplight_runner <frames_dir> <output_dir> <detections.jsonl> [config.yaml]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stoplight_vision=info,stoplight_runner=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 || args.len() > 4 {
        bail!(USAGE);
    }
    let (frames_dir, output_dir, detections_path) = (&args[0], &args[1], &args[2]);

    let config = match args.get(3) {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => PipelineConfig::default(),
    };
    info!(
        "Light thresholds: s_min={}, v_min={}, min_area={}, min_solidity={:.2}, trail_len={}",
        config.s_min, config.v_min, config.min_area, config.min_solidity, config.trail_len
    );

    let detector = ReplayDetector::from_path(detections_path)
        .with_context(|| format!("reading detections from {detections_path}"))?
        .with_config(&config.detector);
    info!(
        "Replaying detections for {} frames (recorded with {} + {}, conf >= {}, classes {:?})",
        detector.frame_count(),
        config.detector.model,
        config.detector.tracker,
        config.detector.confidence,
        config.detector.classes
    );

    let mut source = ImageSequenceSource::open(frames_dir)?;
    let mut sink = ImageSequenceSink::create(output_dir)?;
    let mut pipeline = ParallelPipeline::new(config, detector)?;

    let summary = pipeline
        .run(&mut source, &mut sink)
        .await
        .context("processing frames")?;

    info!(
        "Done: {} frames, {} vehicles, {} stop lights",
        summary.frames, summary.vehicles, summary.stop_lights
    );
    Ok(())
}
