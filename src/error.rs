//! Error types for the inference bridge

use std::path::PathBuf;

/// Errors returned by bridge operations.
///
/// Caller contract violations (bad index, missing session, wrong buffer size)
/// are reported before any memory is touched. Backend failures carry the
/// underlying engine error as their source.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no compute devices are available")]
    NoDevices,

    #[error("device index {index} is out of range ({count} devices available)")]
    DeviceIndexOutOfRange { index: usize, count: usize },

    #[error("no model is loaded")]
    ModelNotLoaded,

    #[error("no session has been compiled")]
    SessionNotCompiled,

    #[error("session was compiled against an outdated device listing")]
    StaleSession,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid input dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("first input '{name}' has rank {rank}, expected 4 (NCHW)")]
    UnsupportedInputRank { name: String, rank: usize },

    #[error("tensor '{name}' has {channels} channels, expected 3")]
    UnsupportedChannels { name: String, channels: usize },

    #[error("output tensor shape {actual:?} does not match expected {expected:?}")]
    OutputShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("tensor shape error: {0}")]
    TensorShape(#[from] ndarray::ShapeError),

    #[error("failed to load model '{}': {source}", .path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to compile model for device '{device}': {source}")]
    Compile {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("inference failed: {0}")]
    Execution(#[source] anyhow::Error),

    #[error("backend error: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("another inference is already in flight")]
    Busy,

    #[error("inference worker failed: {0}")]
    Worker(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
