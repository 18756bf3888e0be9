//! Error handling module for Lapse

use thiserror::Error;

/// Main error type for Lapse export operations
#[derive(Error, Debug)]
pub enum LapseError {
    /// Input file not found or inaccessible
    #[error("Input file not found: {path}")]
    InputNotFound { path: String },

    /// Time range validation error
    #[error("Invalid time range: {message}")]
    InvalidTimeRange { message: String },

    /// Invalid time format
    #[error("Invalid time format: {time}. Expected HH:MM:SS.ms, MM:SS.ms, or seconds")]
    InvalidTimeFormat { time: String },

    /// Speed multiplier outside the supported window
    #[error("Invalid speed multiplier: {value} (supported range is {min}x to {max}x)")]
    InvalidSpeed { value: f64, min: f64, max: f64 },

    /// Disk preflight found too little space at the destination
    #[error("Insufficient disk space: need about {required} bytes, {available} available")]
    InsufficientDiskSpace { required: u64, available: u64 },

    /// Source has no video stream
    #[error("No video track in source: {path}")]
    NoVideoTrack { path: String },

    /// Passthrough found no sync samples in the selected range
    #[error("No keyframes found in the selected range; passthrough export would be empty")]
    MissingKeyframes,

    /// Media probe error
    #[error("Failed to probe media file: {message}")]
    ProbeError { message: String },

    /// The underlying writer or encoder rejected a sample
    #[error("Encode or write failure: {message}")]
    EncodeOrWrite { message: String },

    /// User-initiated cancellation; surfaced distinctly from failures
    #[error("Export cancelled")]
    Cancelled,

    /// A session is single-use once started
    #[error("Export session already started")]
    AlreadyStarted,

    /// FFmpeg initialization error
    #[error("Failed to initialize FFmpeg: {message}")]
    FfmpegInit { message: String },

    /// Configuration file problems
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FFmpeg error
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

impl LapseError {
    /// True for the cancellation sentinel, which is not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LapseError::Cancelled)
    }

    /// Wrap a low-level FFmpeg error raised while writing output, mapping the
    /// known codes to human-readable categories.
    pub fn write_failure(context: &str, err: ffmpeg_next::Error) -> Self {
        let category = match err {
            ffmpeg_next::Error::InvalidData => "unsupported or corrupt media data",
            ffmpeg_next::Error::EncoderNotFound => "encoder not available in this FFmpeg build",
            ffmpeg_next::Error::MuxerNotFound => "container format not available",
            ffmpeg_next::Error::Eof => "unexpected end of stream",
            // Error's Display already renders the OS message for errno-backed
            // codes ("No space left on device", "Permission denied", ...).
            _ => "",
        };
        let message = if category.is_empty() {
            format!("{context}: {err}")
        } else {
            format!("{context}: {category} ({err})")
        };
        LapseError::EncodeOrWrite { message }
    }
}

/// Result type alias for Lapse operations
pub type LapseResult<T> = std::result::Result<T, LapseError>;
