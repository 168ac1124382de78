//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `stockings` session layer.
//!
//! It centralizes the error type shared by every module and the tracing
//! subscriber setup used by the binary and tests.

pub mod error;
pub mod logging;
