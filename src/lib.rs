// THEORY:
// This file is the main entry point for the `stoplight_vision` library crate.
// The engine takes a stream of video frames plus tracked vehicle detections
// from an external detector, finds lit red stop lights in the lower part of
// every vehicle box, remembers a short centroid trail per track and burns boxes,
// labels and trails into each output frame.
//
// `FramePipeline` (and its tokio twin `ParallelPipeline`) is the high-level
// interface. The pure building blocks (color mask, blob extraction, trail store,
// overlay planning) live in `core_modules` and can be used on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{Result, VisionError};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{FramePipeline, FrameReport, RunSummary};
