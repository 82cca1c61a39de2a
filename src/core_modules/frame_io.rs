// THEORY:
// Frames enter and leave the engine through two small traits. A `FrameSource`
// is a lazy, finite, non-restartable stream: `Ok(Some(frame))` for the next
// frame, `Ok(None)` once it is exhausted, `Err` only for real failures. A
// `FrameSink` accepts finished frames in order and is told exactly once that
// the run is over.
//
// Video decode/encode lives outside this crate. The image-sequence adapters
// here read and write a directory of still images, which is enough to run the
// engine end to end and to test it.

use crate::error::{Result, VisionError};
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// A lazy stream of frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Receives composited frames in input order.
pub trait FrameSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    /// Releases the sink. Called once at the end of a run, even after an error.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// In-memory frames, mostly for tests and for callers that already hold
/// decoded images.
impl FrameSource for std::vec::IntoIter<RgbImage> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.next())
    }
}

/// Collects every written frame.
impl FrameSink for Vec<RgbImage> {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}

/// Reads every image file of a directory as one frame, in file name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: std::vec::IntoIter<PathBuf>,
    index: u64,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| VisionError::InputUnavailable {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        paths.sort();

        info!("Found {} frames in {}", paths.len(), dir.display());
        Ok(Self {
            paths: paths.into_iter(),
            index: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.next() else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;

        let frame = image::open(&path)
            .map_err(|source| VisionError::FrameDecode {
                index,
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        debug!(index, path = %path.display(), "frame loaded");
        Ok(Some(frame))
    }
}

/// Writes frames as `frame_000000.png`, `frame_000001.png`, ... into a directory.
#[derive(Debug)]
pub struct ImageSequenceSink {
    dir: PathBuf,
    written: u64,
    finished: bool,
}

impl ImageSequenceSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| VisionError::OutputSink {
            index: 0,
            source: Box::new(source),
        })?;
        Ok(Self {
            dir,
            written: 0,
            finished: false,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl FrameSink for ImageSequenceSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let index = self.written;
        frame
            .save_with_format(self.frame_path(index), ImageFormat::Png)
            .map_err(|source| VisionError::OutputSink {
                index,
                source: Box::new(source),
            })?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.finished = true;
            info!("Wrote {} frames to {}", self.written, self.dir.display());
        }
        Ok(())
    }
}
