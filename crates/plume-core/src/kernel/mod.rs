//! # Plume Core Kernel
//!
//! Shared foundations for the rest of `plume-core`:
//!
//! - **Core Constants**: descriptor file names, persisted-state file names and the
//!   bootstrap loader tags, via the `constants` submodule.
//! - **Error Handling**: the crate-wide [`Error`](error::Error) wrapper over the
//!   subsystem errors and its `Result` alias, in the `error` submodule.
pub mod constants;
pub mod error;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
