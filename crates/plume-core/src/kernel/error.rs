//! # Plume Core Kernel Errors
//!
//! Defines the crate-wide [`Error`] type.
//!
//! Every subsystem keeps its own typed error enum (plugin system, storage);
//! this module unifies them so host-facing entry points such as the async
//! plugin manager and the CLI can propagate any of them with `?`.
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::plugin_system::error::{ErrorList, PluginSystemError};
use crate::storage::error::StorageSystemError;

/// Top-level error for the Plume core
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Several independent plugin failures reported together
    #[error("{} plugin error(s):\n{}", .0.len(), .0)]
    Plugins(ErrorList),

    /// Specific, typed storage system error
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<ErrorList> for Error {
    fn from(errors: ErrorList) -> Self {
        Error::Plugins(errors)
    }
}
