use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] strata_io::Error),

    #[error(transparent)]
    Codec(#[from] strata_codec::Error),

    #[error(transparent)]
    Core(#[from] strata_core::Error),

    #[error("corrupt segment {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("unknown column handle {0}")]
    UnknownHandle(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Index(e.to_string())
    }
}

impl Error {
    pub(crate) fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}
