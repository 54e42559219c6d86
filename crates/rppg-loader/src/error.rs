//! Error types shared across the loader.
//!
//! Variants follow four families:
//! - contract violations (`IndexOutOfRange`, `InvalidArgument`, `Contract`, `NoSessions`)
//! - data-consistency violations (`DataConsistency`, `Parse`)
//! - collaborator / I/O failures (`Io`, `Collaborator`, `Json`)
//! - configuration (`Config`)
//!
//! Expected absence (no HR in a window, no reference channel) is never an
//! error; it is reported as `None` or `UNKNOWN_BPM`.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("{0}: no sessions loaded")]
    NoSessions(String),
    #[error("data consistency violation: {0}")]
    DataConsistency(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("collaborator failure: {0}")]
    Collaborator(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl LoaderError {
    /// True for failures that invalidate a single session but must not
    /// escape the registry.
    pub fn is_data_consistency(&self) -> bool {
        matches!(self, Self::DataConsistency(_) | Self::Parse(_))
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;
