//! Snapshot state management.
//!
//! This module provides the pure state-transition functions applied to the
//! shared `PipelineStatus`.

pub mod snapshot;
