//! # mk-core
//!
//! Stage tracking and process supervision for miner-kit.
//!
//! This crate provides:
//! - Configuration loading from the `.miner-kit/` directory
//! - A cross-process status store holding the current pipeline snapshot
//! - The stage tracking API used by workers, with a no-op fallback
//! - A reporter that logs every observed transition
//! - The supervisor that dispatches accounts and keeps modules alive
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`state`]: Pure snapshot transitions
//! - [`store`]: File-backed status store
//! - [`tracker`]: Stage tracking API
//! - [`reporter`]: Snapshot polling and transition logging
//! - [`supervisor`]: Watchdog/direct supervisor, health monitor, work sources
//! - [`worker`]: Per-account workers

pub mod config;
pub mod reporter;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod tracker;
pub mod worker;
