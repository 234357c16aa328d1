//! Error type shared by the session pool, players and the audio tunnel.

use thiserror::Error;

use crate::events::Status;
use crate::media::MediaType;

/// Main error type for the media core.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Allocation failed or a buffer budget was exceeded.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// The session has no output channel.
    #[error("No audio device available")]
    NoAudioDevice,

    /// The soundbank could not be located or parsed.
    #[error("Soundbank unavailable: {0}")]
    Soundbank(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The locator names a scheme or resource that cannot be opened.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The control is not part of the media type's capability set.
    #[error("{op} is not supported for {media} players")]
    Unsupported { op: &'static str, media: MediaType },

    /// The operation is not valid in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed media content.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Operation failed: {0}")]
    Fail(String),
}

impl MediaError {
    /// Status code reported at the notification boundary.
    pub fn status(&self) -> Status {
        match self {
            Self::OutOfMemory(_) => Status::OutOfMemory,
            Self::NoAudioDevice | Self::Soundbank(_) => Status::NoAudioDevice,
            Self::Io(_) | Self::Decode(_) => Status::IoError,
            Self::ConnectionNotFound(_) => Status::ConnectionNotFound,
            Self::InvalidArgument(_) => Status::InvalidArgument,
            Self::Unsupported { .. } => Status::Unsupported,
            Self::InvalidState(_) | Self::Fail(_) => Status::Fail,
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
