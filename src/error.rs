//! Crate-level error for configuration and process wiring.

use thiserror::Error;

use crate::{core::store::StoreError, persist::PersistError, runtime::handle::RuntimeError};

/// Failures that stop the service from starting or shutting down cleanly.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration sources could not be read or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    /// Configuration was read but is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The backing sink could not be set up.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The initial snapshot could not be built.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The runtime failed during shutdown.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// The HTTP listener could not be bound.
    #[error("could not bind http listener: {0}")]
    Bind(#[from] warp::Error),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
