//! Error hierarchy for the coordination store facade.
//!
//! Collaborator failures are surfaced verbatim through [`Error::Engine`];
//! the facade only adds the caller-correctable variants it detects itself.

use config::ConfigError;

use crate::EngineError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed store configuration
    #[error("Invalid configuration supplied: {0}")]
    InvalidConfig(String),

    /// Layered configuration loading failures (files, environment)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Join endpoint is not a well-formed `host:port`
    #[error("Invalid members / endpoint address: {0}")]
    InvalidAddress(String),

    /// Any failure reported by the embedded cluster engine, unchanged
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Error {
    /// True when the failure came from the wrapped engine rather than the facade.
    pub fn is_engine(&self) -> bool {
        matches!(self, Error::Engine(_))
    }
}
