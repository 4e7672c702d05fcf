// Error taxonomy for the library side of the crate. The UI and the binary
// wrap these in `anyhow` the same way the menus always did; inside the
// library every fallible call returns `iaps3::Result`.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport level failure (DNS, TLS, reset, timeout...).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("unexpected HTTP status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    /// The requested file is not part of the item's file listing.
    #[error("file '{file}' not found in item '{item}'")]
    NotFound { item: String, file: String },

    /// A listing came back empty; caches are left untouched.
    #[error("{0} listing is empty")]
    EmptyListing(&'static str),

    #[error("invalid selection: {0}")]
    Selection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error on {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attach the offending path to an i/o error.
    pub fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Path {
            path: path.into(),
            source,
        }
    }
}
