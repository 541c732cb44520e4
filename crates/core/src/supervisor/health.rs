//! Module health monitoring and restart.
//!
//! The HealthMonitor owns every supervised module. On each check it probes
//! them, marks dead ones `Crashed` and schedules their restart according to
//! the `RestartPolicy`, escalating modules that keep failing. Restarts run
//! on their own timer, not on the check interval. The resulting states are
//! written to the status store after every check and every restart.

use crate::state::snapshot::record_module_state;
use crate::store::StatusStore;
use crate::supervisor::module::{Liveness, Module};
use crate::supervisor::restart::RestartPolicy;
use chrono::Utc;
use mk_protocol::status_models::{ModuleState, ModuleStatus};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct Supervised {
    module: Box<dyn Module>,
    state: ModuleState,
    restart_at: Option<Instant>,
}

/// Owns and watches the supervisor's modules.
pub struct HealthMonitor {
    modules: Vec<Supervised>,
    policy: RestartPolicy,
    store: Option<StatusStore>,
    grace: Duration,
}

impl HealthMonitor {
    pub fn new(policy: RestartPolicy, store: Option<StatusStore>, grace: Duration) -> Self {
        Self {
            modules: Vec::new(),
            policy,
            store,
            grace,
        }
    }

    /// Add a module. It is not started until `start_all`.
    pub fn add(&mut self, module: Box<dyn Module>) {
        let mut state = ModuleState::running(None);
        state.state = ModuleStatus::Stopped;
        state.last_heartbeat = None;
        self.modules.push(Supervised {
            module,
            state,
            restart_at: None,
        });
    }

    pub fn set_policy(&mut self, policy: RestartPolicy) {
        self.policy = policy;
    }

    /// Current state of every module, by name.
    pub fn states(&self) -> BTreeMap<String, ModuleState> {
        self.modules
            .iter()
            .map(|s| (s.module.name().to_string(), s.state.clone()))
            .collect()
    }

    /// Start every module. A module that fails to start is treated as
    /// crashed and goes through the normal restart schedule.
    pub async fn start_all(&mut self) {
        let policy = self.policy.clone();
        for supervised in &mut self.modules {
            match supervised.module.start().await {
                Ok(pid) => supervised.state = ModuleState::running(pid),
                Err(e) => {
                    error!(module = supervised.module.name(), error = %e, "Module failed to start");
                    record_failure(supervised, &policy, Instant::now());
                }
            }
        }
        self.persist().await;
    }

    /// Probe every module once and act on the result.
    ///
    /// Restarts that are already due, including zero-delay ones scheduled
    /// by this check, run before it returns.
    pub async fn check_once(&mut self) {
        let policy = self.policy.clone();
        let grace = self.grace;

        for supervised in &mut self.modules {
            if supervised.state.state != ModuleStatus::Running {
                continue;
            }
            let now = Instant::now();
            match supervised.module.probe().await {
                Liveness::Healthy => {
                    supervised.state.consecutive_failures = 0;
                    supervised.state.last_heartbeat = Some(Utc::now());
                }
                Liveness::Unresponsive => {
                    warn!(module = supervised.module.name(), "Module unresponsive; stopping it");
                    if let Err(e) = supervised.module.stop(grace).await {
                        warn!(module = supervised.module.name(), error = %e, "Failed to stop module");
                    }
                    record_failure(supervised, &policy, now);
                }
                Liveness::Dead => {
                    error!(module = supervised.module.name(), "Module crashed");
                    record_failure(supervised, &policy, now);
                }
            }
        }

        self.restart_due().await;
    }

    /// Restart every crashed module whose backoff has elapsed.
    pub async fn restart_due(&mut self) {
        let policy = self.policy.clone();
        let now = Instant::now();

        for supervised in &mut self.modules {
            let due = !supervised.state.escalated
                && matches!(
                    supervised.state.state,
                    ModuleStatus::Crashed | ModuleStatus::Restarting
                )
                && supervised.restart_at.is_some_and(|at| at <= now);
            if due {
                restart(supervised, &policy, self.store.as_ref()).await;
            }
        }

        self.persist().await;
    }

    /// When the earliest scheduled restart is due.
    fn next_restart(&self) -> Option<Instant> {
        self.modules
            .iter()
            .filter(|s| !s.state.escalated)
            .filter_map(|s| s.restart_at)
            .min()
    }

    /// Stop every module and mark it `Stopped`. Crashed modules keep their
    /// state so the failure stays visible.
    pub async fn stop_all(&mut self) {
        for supervised in &mut self.modules {
            if let Err(e) = supervised.module.stop(self.grace).await {
                warn!(module = supervised.module.name(), error = %e, "Failed to stop module");
            }
            supervised.restart_at = None;
            if supervised.state.state != ModuleStatus::Crashed {
                supervised.state.state = ModuleStatus::Stopped;
            }
            supervised.state.pid = None;
        }
        self.persist().await;
    }

    /// Run `check_once` every `interval`, and each restart when its backoff
    /// elapses, until `cancel` fires. The monitor is handed back so its
    /// modules can be stopped.
    pub fn spawn(mut self, interval: Duration, cancel: CancellationToken) -> JoinHandle<Self> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                let next_restart = self.next_restart();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.check_once().await,
                    _ = sleep_until(next_restart) => self.restart_due().await,
                }
            }
            self
        })
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let states = self.states();
        let result = store
            .update_async(move |status| {
                for (name, state) in states {
                    record_module_state(status, &name, state);
                }
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to record module states");
        }
    }
}

/// Sleep until `deadline`, or forever without one.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Mark a module crashed and schedule its next restart, or escalate it if
/// the restart budget is spent.
fn record_failure(supervised: &mut Supervised, policy: &RestartPolicy, now: Instant) {
    let state = &mut supervised.state;
    state.state = ModuleStatus::Crashed;
    state.pid = None;
    state.consecutive_failures += 1;

    match policy.delay_for_attempt(state.consecutive_failures) {
        Some(delay) => {
            info!(
                module = supervised.module.name(),
                attempt = state.consecutive_failures,
                ?delay,
                "Scheduling module restart"
            );
            supervised.restart_at = Some(now + delay);
        }
        None => {
            error!(
                module = supervised.module.name(),
                failures = state.consecutive_failures,
                "Module keeps failing; giving up on automatic restarts"
            );
            state.escalated = true;
            supervised.restart_at = None;
        }
    }
}

async fn restart(supervised: &mut Supervised, policy: &RestartPolicy, store: Option<&StatusStore>) {
    supervised.state.state = ModuleStatus::Restarting;
    if let Some(store) = store {
        let name = supervised.module.name().to_string();
        let state = supervised.state.clone();
        let result = store
            .update_async({
                let name = name.clone();
                move |status| record_module_state(status, &name, state)
            })
            .await;
        if let Err(e) = result {
            warn!(module = %name, error = %e, "Failed to record restart");
        }
    }

    match supervised.module.start().await {
        Ok(pid) => {
            let state = &mut supervised.state;
            state.state = ModuleStatus::Running;
            state.pid = pid;
            state.restart_count += 1;
            state.last_heartbeat = Some(Utc::now());
            supervised.restart_at = None;
            info!(
                module = supervised.module.name(),
                ?pid,
                restart_count = state.restart_count,
                "Module restarted"
            );
        }
        Err(e) => {
            error!(module = supervised.module.name(), error = %e, "Module restart failed");
            record_failure(supervised, policy, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::module::ModuleError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    struct FlakyModule {
        alive: Arc<AtomicBool>,
        starts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Module for FlakyModule {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn start(&mut self) -> Result<Option<u32>, ModuleError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.alive.store(true, Ordering::SeqCst);
            Ok(Some(100))
        }

        async fn probe(&mut self) -> Liveness {
            if self.alive.load(Ordering::SeqCst) {
                Liveness::Healthy
            } else {
                Liveness::Dead
            }
        }

        async fn stop(&mut self, _grace: Duration) -> Result<(), ModuleError> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Never comes up; records when each start was attempted.
    struct BrokenModule {
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Module for BrokenModule {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&mut self) -> Result<Option<u32>, ModuleError> {
            self.attempts
                .lock()
                .expect("lock poisoned")
                .push(Instant::now());
            Err(ModuleError::Spawn {
                module: "broken".to_string(),
                program: "broken".to_string(),
                reason: "exits immediately".to_string(),
            })
        }

        async fn probe(&mut self) -> Liveness {
            Liveness::Dead
        }

        async fn stop(&mut self, _grace: Duration) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn monitor(policy: RestartPolicy) -> (HealthMonitor, Arc<AtomicBool>, Arc<AtomicU32>) {
        let alive = Arc::new(AtomicBool::new(false));
        let starts = Arc::new(AtomicU32::new(0));
        let mut monitor = HealthMonitor::new(policy, None, Duration::from_millis(10));
        monitor.add(Box::new(FlakyModule {
            alive: Arc::clone(&alive),
            starts: Arc::clone(&starts),
        }));
        (monitor, alive, starts)
    }

    #[tokio::test]
    async fn test_crash_is_restarted_immediately_with_zero_delay() {
        let (mut monitor, alive, starts) = monitor(RestartPolicy::fixed(3, Duration::ZERO));
        monitor.start_all().await;

        alive.store(false, Ordering::SeqCst);
        monitor.check_once().await;

        let state = &monitor.states()["flaky"];
        assert_eq!(state.state, ModuleStatus::Running);
        assert_eq!(state.restart_count, 1);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_healthy_probe_resets_failures() {
        let (mut monitor, alive, _starts) = monitor(RestartPolicy::fixed(3, Duration::ZERO));
        monitor.start_all().await;
        alive.store(false, Ordering::SeqCst);
        monitor.check_once().await;

        monitor.check_once().await;

        assert_eq!(monitor.states()["flaky"].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_restart_waits_for_backoff() {
        let (mut monitor, alive, starts) =
            monitor(RestartPolicy::fixed(3, Duration::from_secs(3600)));
        monitor.start_all().await;

        alive.store(false, Ordering::SeqCst);
        monitor.check_once().await;
        monitor.check_once().await;

        let state = &monitor.states()["flaky"];
        assert_eq!(state.state, ModuleStatus::Crashed);
        assert_eq!(state.restart_count, 0);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_escalates_after_budget() {
        let (mut monitor, alive, starts) = monitor(RestartPolicy::fixed(2, Duration::ZERO));
        monitor.start_all().await;

        for _ in 0..3 {
            alive.store(false, Ordering::SeqCst);
            monitor.check_once().await;
        }
        monitor.check_once().await;

        let state = &monitor.states()["flaky"];
        assert_eq!(state.state, ModuleStatus::Crashed);
        assert!(state.escalated);
        assert_eq!(state.restart_count, 2);
        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_all_marks_stopped() {
        let (mut monitor, alive, _starts) = monitor(RestartPolicy::default());
        monitor.start_all().await;

        monitor.stop_all().await;

        assert!(!alive.load(Ordering::SeqCst));
        assert_eq!(monitor.states()["flaky"].state, ModuleStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_follow_backoff_not_check_interval() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let policy = RestartPolicy::Exponential {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };
        let mut monitor = HealthMonitor::new(policy, None, Duration::from_millis(10));
        monitor.add(Box::new(BrokenModule {
            attempts: Arc::clone(&attempts),
        }));
        monitor.start_all().await;

        let cancel = CancellationToken::new();
        let handle = monitor.spawn(Duration::from_secs(3600), cancel.clone());
        time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        let monitor = handle.await.expect("health loop");

        let attempts = attempts.lock().expect("lock poisoned").clone();
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        let expected = [100, 200, 400, 800, 1600].map(Duration::from_millis);
        for (gap, delay) in gaps.iter().zip(expected) {
            assert!(*gap >= delay, "gap {gap:?} shorter than backoff {delay:?}");
            assert!(*gap < delay + Duration::from_millis(50), "gap {gap:?} for {delay:?}");
        }
        assert!(monitor.states()["broken"].escalated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_due_waits_for_its_deadline() {
        let (mut monitor, alive, starts) =
            monitor(RestartPolicy::fixed(3, Duration::from_millis(500)));
        monitor.start_all().await;
        alive.store(false, Ordering::SeqCst);
        monitor.check_once().await;

        monitor.restart_due().await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(500)).await;
        monitor.restart_due().await;

        let state = &monitor.states()["flaky"];
        assert_eq!(state.state, ModuleStatus::Running);
        assert_eq!(state.restart_count, 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }
}
