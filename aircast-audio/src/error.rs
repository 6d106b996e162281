//! Error types for aircast-audio
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//!
//! Classification follows how each failure is handled by the owning session:
//! - `OpenError` rejects session creation; nothing partially constructed survives.
//! - `FormatError` and `ConversionError` are fatal to the session (it ejects).
//! - `EngineError` from a decode call is recoverable at packet granularity;
//!   from a container write it terminates the encoder via its stopping path.

use thiserror::Error;

/// Failure to open a decode source, stream, or codec.
///
/// Returned only from session `open`; a failed open releases every resource
/// acquired up to the point of failure.
#[derive(Error, Debug)]
pub enum OpenError {
    /// Source file or URL could not be opened
    #[error("source not found: {0}")]
    NotFound(String),

    /// Source contains no decodable audio stream
    #[error("no audio stream in source")]
    NoAudioStream,

    /// Codec could not be opened for the selected stream
    #[error("could not open codec: {0}")]
    CodecOpenFailed(String),

    /// Buffer or context allocation failure
    #[error("allocation failed: {0}")]
    AllocFailed(String),
}

/// Unsupported decoded sample layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// More than two source channels; never silently downmixed here
    #[error("unhandled number of channels: {0}")]
    UnsupportedChannelCount(u16),

    /// A planar frame arrived without one plane per channel
    #[error("expected {expected} sample planes, got {got}")]
    MissingPlane {
        /// Planes required by the declared channel count
        expected: usize,
        /// Planes actually present
        got: usize,
    },

    /// Plane byte lengths disagree about the frame count
    #[error("sample plane shorter than the frame count implies")]
    ShortPlane,
}

/// Rate conversion failure; fatal to the owning session.
#[derive(Error, Debug)]
#[error("rate conversion failed: {0}")]
pub struct ConversionError(pub String);

/// Failure reported by the decode or mux engine.
#[derive(Error, Debug)]
#[error("engine error: {0}")]
pub struct EngineError(pub String);

/// Main error type for aircast-audio
#[derive(Error, Debug)]
pub enum Error {
    /// Session open failure
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Unsupported decoded sample layout
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Resampler failure
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Decode/encode/mux engine failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using aircast-audio Error
pub type Result<T> = std::result::Result<T, Error>;
