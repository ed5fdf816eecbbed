use thiserror::Error;

/// Errors produced by the download coordinator and its collaborators.
///
/// `Stopped` is kept apart from real failures so callers can report a
/// paused operation instead of a failed one.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stopped by user")]
    Stopped,

    #[error("no tracks found for {0}")]
    NoTracks(String),

    #[error("catalog credentials missing or rejected: {0}")]
    Credentials(String),

    #[error("catalog lookup failed: {0}")]
    Catalog(String),

    #[error("download engine not found: {0}")]
    EngineMissing(String),

    #[error("download failed: {0}")]
    Engine(String),

    #[error("tagging failed: {0}")]
    Tag(String),

    #[error("nothing to resume")]
    NothingToResume,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, FetchError::Stopped)
    }
}

impl From<id3::Error> for FetchError {
    fn from(error: id3::Error) -> Self {
        FetchError::Tag(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
