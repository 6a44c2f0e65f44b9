//! Error taxonomy for the scanning and fuzzing engine.
//!
//! Configuration and parse failures are fatal before the first request.
//! Transport failures never escape a scan: the engine folds them into the
//! owning `ScanResult` instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Malformed vector or fuzzing input, or an unusable option value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The baseline request could not be parsed as an HTTP request.
    #[error("failed to parse HTTP request: {0}")]
    Parse(String),

    /// A payload could not be applied to a cloned request.
    #[error("mutation failed: {0}")]
    Mutation(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Connect, TLS or read failure on the verbatim transport.
    #[error("socket error")]
    Socket(#[from] std::io::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }

    /// Config error carrying the JSON location of a serde failure.
    pub fn json(what: &str, err: serde_json::Error) -> Self {
        ScanError::Config(format!(
            "invalid {} at line {}, column {}: {}",
            what,
            err.line(),
            err.column(),
            err
        ))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
