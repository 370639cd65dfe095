//! Error types for ccmedia
//!
//! Two layers are used. [`MediaError`] is the rich error returned through
//! `Result` inside the pipeline, and [`MediaCode`] is the small status code
//! carried by closures back to consumers.

use serde::Serialize;
use thiserror::Error;

/// Status code delivered to closures and exposed at the consumer boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MediaCode {
    Success = 0,
    Fail = 1,
    InvalidProtocol = 2,
    InvalidArgument = 3,
    InvalidStream = 4,
    UnknownCodec = 5,
    InvalidMedia = 6,
    SeekError = 7,
    FileError = 8,
    CodecError = 9,
    OutOfMemory = 10,
    DemuxerError = 11,
    ConverterError = 12,
    UnknownConverter = 13,
    UnknownMediaType = 14,
    CodecDelayed = 15,
    NoMoreData = 16,
    CorruptedMedia = 17,
    NoCallback = 18,
    InvalidData = 19,
    ReadError = 20,
    BufferUnderflow = 21,
    NotEnoughData = 22,
}

impl MediaCode {
    /// True only for `Success`
    pub fn is_success(self) -> bool {
        self == MediaCode::Success
    }

    /// Codes that steer control flow rather than report a failure
    pub fn is_policy_signal(self) -> bool {
        matches!(
            self,
            MediaCode::NoMoreData | MediaCode::NotEnoughData | MediaCode::CodecDelayed
        )
    }

    /// The operation may succeed if retried once more data arrives
    pub fn is_retryable(self) -> bool {
        self == MediaCode::NotEnoughData
    }

    /// Numeric value of the code
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for MediaCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, self.as_u8())
    }
}

/// Main error type for ccmedia
#[derive(Error, Debug)]
pub enum MediaError {
    /// Generic failure
    #[error("Operation failed: {0}")]
    Fail(String),

    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    /// No decoder accepts the codec identifier
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    /// Container header failed to parse
    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Seek error: {0}")]
    Seek(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Demuxer error: {0}")]
    Demuxer(String),

    #[error("Converter error: {0}")]
    Converter(String),

    #[error("Unknown converter: {0}")]
    UnknownConverter(String),

    /// No demuxer recognized the source
    #[error("Unknown media type: {0}")]
    UnknownMediaType(String),

    /// End of stream, not a failure
    #[error("No more data")]
    NoMoreData,

    #[error("Corrupted media: {0}")]
    CorruptedMedia(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Buffer underflow: {0}")]
    BufferUnderflow(String),

    /// The source is still filling; retry later
    #[error("Not enough data available yet")]
    NotEnoughData,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Status code for this error
    pub fn code(&self) -> MediaCode {
        match self {
            MediaError::Fail(_) | MediaError::Config(_) | MediaError::Internal(_) => MediaCode::Fail,
            MediaError::InvalidProtocol(_) => MediaCode::InvalidProtocol,
            MediaError::InvalidArgument(_) => MediaCode::InvalidArgument,
            MediaError::InvalidStream(_) => MediaCode::InvalidStream,
            MediaError::UnknownCodec(_) => MediaCode::UnknownCodec,
            MediaError::InvalidMedia(_) => MediaCode::InvalidMedia,
            MediaError::Seek(_) => MediaCode::SeekError,
            MediaError::FileError(_) => MediaCode::FileError,
            MediaError::Codec(_) => MediaCode::CodecError,
            MediaError::OutOfMemory(_) => MediaCode::OutOfMemory,
            MediaError::Demuxer(_) => MediaCode::DemuxerError,
            MediaError::Converter(_) => MediaCode::ConverterError,
            MediaError::UnknownConverter(_) => MediaCode::UnknownConverter,
            MediaError::UnknownMediaType(_) => MediaCode::UnknownMediaType,
            MediaError::NoMoreData => MediaCode::NoMoreData,
            MediaError::CorruptedMedia(_) => MediaCode::CorruptedMedia,
            MediaError::InvalidData(_) => MediaCode::InvalidData,
            MediaError::Read(_) => MediaCode::ReadError,
            MediaError::BufferUnderflow(_) => MediaCode::BufferUnderflow,
            MediaError::NotEnoughData => MediaCode::NotEnoughData,
        }
    }

    /// End of stream reached
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, MediaError::NoMoreData)
    }

    /// Source not yet filled far enough
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaError::NotEnoughData)
    }

    /// Create a demuxer error from string
    pub fn demuxer_error<S: Into<String>>(msg: S) -> Self {
        MediaError::Demuxer(msg.into())
    }
}

impl From<&MediaError> for MediaCode {
    fn from(err: &MediaError) -> Self {
        err.code()
    }
}

impl<T> From<&Result<T>> for MediaCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => MediaCode::Success,
            Err(e) => e.code(),
        }
    }
}

/// Convenience type alias for Results in ccmedia
pub type Result<T> = std::result::Result<T, MediaError>;

/// Extension trait for converting other errors to MediaError
pub trait IntoMediaError<T> {
    /// Convert this error into a MediaError with the given context
    fn demuxer_err(self, context: &str) -> Result<T>;
    fn codec_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoMediaError<T> for std::result::Result<T, E> {
    fn demuxer_err(self, context: &str) -> Result<T> {
        self.map_err(|e| MediaError::Demuxer(format!("{}: {}", context, e)))
    }

    fn codec_err(self, context: &str) -> Result<T> {
        self.map_err(|e| MediaError::Codec(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| MediaError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::MediaError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::MediaError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
