use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by persisted stores and their storage backends.
#[derive(Error, Debug)]
pub enum Error {
    #[error("stored value for key `{key}` is not valid JSON: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value for key `{key}` could not be serialized: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage file {} is not a JSON object of strings: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("key `{key}` is registered with a different value type")]
    TypeMismatch { key: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
