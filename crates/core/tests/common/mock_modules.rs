//! Mock module implementations for deterministic supervision tests.

use async_trait::async_trait;
use mk_core::supervisor::{Liveness, Module, ModuleError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Test-side controls for a `MockModule`.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct ModuleHandle {
    alive: Arc<AtomicBool>,
    unresponsive: Arc<AtomicBool>,
    refuse_start: Arc<AtomicBool>,
    starts: Arc<AtomicU32>,
    stops: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl ModuleHandle {
    /// Make the next probe report the module dead.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Keep the process alive but stop its heartbeats until the next start.
    pub fn hang(&self) {
        self.unresponsive.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent start fail.
    pub fn refuse_start(&self) {
        self.refuse_start.store(true, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

/// A module that lives entirely in memory.
#[allow(dead_code)]
pub struct MockModule {
    name: String,
    handle: ModuleHandle,
}

#[allow(dead_code)]
impl MockModule {
    pub fn new(name: &str) -> (Self, ModuleHandle) {
        let handle = ModuleHandle::default();
        (
            Self {
                name: name.to_string(),
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait]
impl Module for MockModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<Option<u32>, ModuleError> {
        self.handle.starts.fetch_add(1, Ordering::SeqCst);
        if self.handle.refuse_start.load(Ordering::SeqCst) {
            return Err(ModuleError::Spawn {
                module: self.name.clone(),
                program: "mock".to_string(),
                reason: "refusing to start".to_string(),
            });
        }
        self.handle.alive.store(true, Ordering::SeqCst);
        self.handle.unresponsive.store(false, Ordering::SeqCst);
        Ok(Some(4242))
    }

    async fn probe(&mut self) -> Liveness {
        if !self.handle.is_alive() {
            Liveness::Dead
        } else if self.handle.unresponsive.load(Ordering::SeqCst) {
            Liveness::Unresponsive
        } else {
            Liveness::Healthy
        }
    }

    async fn stop(&mut self, _grace: Duration) -> Result<(), ModuleError> {
        self.handle.stops.fetch_add(1, Ordering::SeqCst);
        self.handle.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}
