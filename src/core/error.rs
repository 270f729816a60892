//! Error handling - Hierarchical errors for the library surface

use thiserror::Error;

use crate::pipeline::DefinitionError;

pub type Result<T> = std::result::Result<T, Error>;

/// Trading-agents error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pipeline definition errors (detected when the pipeline is built)
    #[error("Pipeline definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Market data feed errors
    #[error("Feed error: {0}")]
    Feed(String),

    /// Broker / order placement errors
    #[error("Broker error: {0}")]
    Broker(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}
