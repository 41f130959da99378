pub mod config;
pub mod error;
pub mod state;

/// Re-export key types
pub use config::{ConfigFormat, HostConfig};
pub use error::StorageSystemError;
pub use state::StateStore;

#[cfg(test)]
mod tests;
