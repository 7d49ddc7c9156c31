//! Shared utilities for flowstate.
//!
//! This crate provides common utilities used across the flowstate workspace:
//! - Logging setup with tracing
//! - User directory resolution

pub mod log;
pub mod path;

pub use log::{init_for_tests, DEFAULT_FILTER};
