mod video_io;

use anyhow::{bail, Context, Result};
use std::env;
use stoplight_vision::core_modules::detection::ReplayDetector;
use stoplight_vision::{FramePipeline, PipelineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;
use video_io::{VideoSink, VideoSource};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stoplight_vision=info,visual_tester=info")),
        )
        .init();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("Usage: visual_tester <input_video> <output_video> <detections.jsonl> [config.yaml]");
    }
    let input_path = &args[1];
    let output_path = &args[2];

    let config = match args.get(4) {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => PipelineConfig {
            trail_len: 32,
            ..PipelineConfig::default()
        },
    };
    let detector = ReplayDetector::from_path(&args[3])
        .with_context(|| format!("reading detections from {}", args[3]))?
        .with_config(&config.detector);

    // --- 2. Video I/O Initialization ---
    let mut source = VideoSource::open(input_path)?;
    let mut sink = VideoSink::create(output_path, source.width, source.height, source.fps)?;

    // --- 3. Pipeline ---
    let mut pipeline = FramePipeline::new(config, detector)?;
    let summary = pipeline.run(&mut source, &mut sink)?;

    info!(
        "Processing complete: {} frames, {} stop lights. Output saved to {}",
        summary.frames, summary.stop_lights, output_path
    );
    Ok(())
}
