//! # duet-common
//!
//! Shared types, configuration, error handling, and wire formats used across all duet crates.
//! This is the foundation layer: no call logic, just primitives and contracts.

pub mod config;
pub mod error;
pub mod ice;
pub mod ids;
pub mod protocol;
pub mod signal;
