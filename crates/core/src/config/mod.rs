//! Configuration loading and management.
//!
//! This module loads `.miner-kit/config.toml` and applies environment
//! overrides.

pub mod error;
pub mod loader;
pub mod models;
