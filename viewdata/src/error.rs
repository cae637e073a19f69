use std::path::PathBuf;

use thiserror::Error;

use crate::Generation;

/// The primary error type that can be produced while resolving view data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to load data from file {0}: {1}")]
    LoadFromFile(PathBuf, Box<Error>),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("cannot determine file type of file: {0}")]
    CannotDetermineFileType(PathBuf),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown cell formatter \"{0}\"")]
    UnknownFormatter(String),
    #[error("cannot parse timestamp \"{0}\"")]
    InvalidTimestamp(String),
    #[error("no data source with ID {0}")]
    NoSuchDataSource(i64),
    #[error("cache path {0} did not resolve to {1}")]
    UnexpectedCacheValue(String, &'static str),
    #[error("settings cannot be applied before data has been fetched for this view")]
    NothingFetched,
    #[error("discarding stale resolution: planned under generation {got}, current generation is {expected}")]
    StaleResolution {
        expected: Generation,
        got: Generation,
    },
}
