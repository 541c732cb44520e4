//! Common test utilities for the integration tests.
//!
//! This module provides shared functionality across the integration tests:
//! - Fixtures (configs rooted in a temp dir, queued descriptors)
//! - Mock modules and workers
//! - Polling assertions against the status store

pub mod assertions;
pub mod fixtures;
pub mod mock_modules;
pub mod mock_workers;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use mock_modules::*;
#[allow(unused_imports)]
pub use mock_workers::*;
