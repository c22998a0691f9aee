//! Error types for the importer.
//!
//! Only fatal conditions are errors. Everything recoverable is recorded in
//! the [`NoticeTree`](crate::notice::NoticeTree) and the entity is dropped.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineError;

/// Fatal import failure
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed XML at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Malformed document: {0}")]
    Malformed(String),

    /// A fatal notice was recorded; the message repeats it
    #[error("Import aborted: {0}")]
    Fatal(String),

    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Invalid [`ImportOptions`](crate::config::ImportOptions)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Base currency must be a non-empty alphabetic ISO code, got '{0}'")]
    InvalidBaseCurrency(String),

    #[error("Maximum input size must be greater than zero")]
    ZeroSizeLimit,

    #[error("Failed to read configuration {path}: {message}")]
    Read { path: PathBuf, message: String },
}
