use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("short read on {path}: wanted {wanted} bytes at offset {offset}, got {got}")]
    ShortRead {
        path: String,
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("unsupported location '{0}'")]
    Unsupported(String),

    #[error("invalid url: {0}")]
    Url(String),
}

impl Error {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<::csv::Error> for Error {
    fn from(e: ::csv::Error) -> Self {
        Error::Csv(e.to_string())
    }
}
