//! # mk-protocol
//!
//! Shared data models for miner-kit.
//!
//! This crate defines the structures exchanged between the supervisor and
//! the per-account worker through the status store:
//! - Pipeline stages and stage events
//! - The persisted status snapshot and module states
//! - Configuration file models
//! - Reporter events
//!
//! ## Modules
//!
//! - [`stage_models`]: The eight pipeline stages and `StageEvent`
//! - [`status_models`]: `PipelineStatus` snapshot and module states
//! - [`config_models`]: `.miner-kit/config.toml` structure
//! - [`work_models`]: Account descriptors handed to the worker
//! - [`ipc`]: Events emitted by the reporter
//!
//! The crate performs no I/O and depends only on serde, chrono and uuid.

pub mod config_models;
pub mod ipc;
pub mod stage_models;
pub mod status_models;
pub mod work_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use ipc::*;
pub use stage_models::*;
pub use status_models::*;
pub use work_models::*;
