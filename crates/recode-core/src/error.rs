// crates/recode-core/src/error.rs
//
// The error taxonomy surfaced to clients when a session fails.
// End of stream is not an error: readers signal it with Ok(None).

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TranscodeError {
    /// Malformed configuration: missing MIME, null format, a sample
    /// larger than the codec buffer it must fit into.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No codec exists for the requested MIME type.
    #[error("no codec for mime type {0}")]
    Unsupported(String),

    /// The codec collaborator reported a failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// The sample reader reported a failure.
    #[error("reader error: {0}")]
    Reader(String),

    /// The pipeline was stopped before the encoder reached end of
    /// stream and no other error was recorded.
    #[error("transcoding cancelled")]
    Cancelled,
}

impl TranscodeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        TranscodeError::InvalidArgument(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        TranscodeError::Codec(msg.into())
    }

    pub fn reader(msg: impl Into<String>) -> Self {
        TranscodeError::Reader(msg.into())
    }
}
