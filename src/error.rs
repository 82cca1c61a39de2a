// THEORY:
// Every fatal condition the engine can hit is collected in `VisionError`.
// Recoverable, frame-local conditions (a vehicle box too small to analyze, a
// candidate whose convex hull has no area) are NOT errors: they are handled
// where they occur and only show up in the trace log and the `FrameReport`.

use std::error::Error as StdError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// The frame source could not be opened. Raised before the first frame.
    #[error("input source unavailable: {}", path.display())]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode frame {index} ({})", path.display())]
    FrameDecode {
        index: u64,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A frame source other than the image-sequence reader failed mid-stream.
    #[error("frame source failed at frame {index}")]
    SourceFailure {
        index: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The external detector/tracker failed. Fatal for the run.
    #[error("detector failed on frame {frame_index}")]
    DetectorFailure {
        frame_index: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("output sink rejected frame {index}")]
    OutputSink {
        index: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("failed to read configuration from {}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to load font {}", path.display())]
    FontLoad {
        path: PathBuf,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("analysis worker failed")]
    Worker(#[from] tokio::task::JoinError),
}
