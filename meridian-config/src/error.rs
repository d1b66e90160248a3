//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading configuration documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The seed file could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The seed document is not valid.
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}
