//! Streaming importer for GnuCash XML books.
//!
//! A book is read as a stream of markup events, validated into entry
//! tables and then materialized against an [`Engine`]. Recoverable
//! problems end up in a [`NoticeTree`]; only fatal ones abort the import.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gnc;
pub mod import;
pub mod notice;
pub mod progress;
pub mod resolve;
pub mod xml;

pub use config::ImportOptions;
pub use engine::{Engine, EngineError, SqliteEngine};
pub use error::{ConfigError, ImportError};
pub use import::{GnuCashImport, ImportSummary};
pub use notice::{Notice, NoticeCode, NoticeTree, Severity, Source};
pub use progress::{ImportProgress, ImportStage};
