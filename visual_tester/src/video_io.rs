// THEORY:
// OpenCV-backed adapters that let the engine read and write real video files.
// OpenCV hands out BGR `Mat`s while the engine works on RGB `image` buffers, so
// both adapters convert at the boundary and nowhere else.

use opencv::{
    core::{self, Mat, Scalar, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use image::RgbImage;
use std::path::PathBuf;
use stoplight_vision::core_modules::frame_io::{FrameSink, FrameSource};
use stoplight_vision::{Result, VisionError};
use tracing::info;

fn source_error(index: u64, err: opencv::Error) -> VisionError {
    VisionError::SourceFailure {
        index,
        source: Box::new(err),
    }
}

fn sink_error(index: u64, err: opencv::Error) -> VisionError {
    VisionError::OutputSink {
        index,
        source: Box::new(err),
    }
}

pub struct VideoSource {
    cap: VideoCapture,
    index: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoSource {
    pub fn open(path: &str) -> Result<Self> {
        let unavailable = |message: String| VisionError::InputUnavailable {
            path: PathBuf::from(path),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
        };

        let cap = VideoCapture::from_file(path, videoio::CAP_ANY)
            .map_err(|e| unavailable(e.to_string()))?;
        if !cap.is_opened().map_err(|e| unavailable(e.to_string()))? {
            return Err(unavailable("could not open video".to_string()));
        }

        let prop = |id| cap.get(id).map_err(|e| unavailable(e.to_string()));
        let width = prop(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = prop(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = prop(videoio::CAP_PROP_FPS)?;

        info!("Opened {path}: {width}x{height} @ {fps:.1} fps");
        Ok(Self { cap, index: 0, width, height, fps })
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let index = self.index;
        let mut bgr = Mat::default();
        if !self.cap.read(&mut bgr).map_err(|e| source_error(index, e))? || bgr.empty() {
            return Ok(None);
        }
        self.index += 1;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| source_error(index, e))?;
        let data = rgb.data_bytes().map_err(|e| source_error(index, e))?.to_vec();

        let frame = RgbImage::from_raw(rgb.cols() as u32, rgb.rows() as u32, data).ok_or_else(|| {
            source_error(
                index,
                opencv::Error::new(core::StsUnmatchedSizes, "frame buffer size mismatch"),
            )
        })?;
        Ok(Some(frame))
    }
}

pub struct VideoSink {
    writer: VideoWriter,
    written: u64,
}

impl VideoSink {
    pub fn create(path: &str, width: u32, height: u32, fps: f64) -> Result<Self> {
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v').map_err(|e| sink_error(0, e))?;
        let writer = VideoWriter::new(
            path,
            fourcc,
            fps,
            Size::new(width as i32, height as i32),
            true,
        )
        .map_err(|e| sink_error(0, e))?;
        Ok(Self { writer, written: 0 })
    }
}

impl FrameSink for VideoSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let index = self.written;
        let mut rgb = Mat::new_rows_cols_with_default(
            frame.height() as i32,
            frame.width() as i32,
            core::CV_8UC3,
            Scalar::all(0.0),
        )
        .map_err(|e| sink_error(index, e))?;
        rgb.data_bytes_mut()
            .map_err(|e| sink_error(index, e))?
            .copy_from_slice(frame.as_raw());

        let mut bgr = Mat::default();
        imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)
            .map_err(|e| sink_error(index, e))?;
        self.writer.write(&bgr).map_err(|e| sink_error(index, e))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release().map_err(|e| sink_error(self.written, e))?;
        info!("Wrote {} frames", self.written);
        Ok(())
    }
}
