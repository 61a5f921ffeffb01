//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `posthub` application.
//!
//! - `error`: the crate-wide `HubError` type.
//! - `logging`: tracing subscriber setup for the binary and tests.

pub mod error;
pub mod logging;

pub use error::HubError;

#[cfg(test)]
mod tests;
