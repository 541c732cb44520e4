//! Module restart policy.

use mk_protocol::config_models::{RestartPolicyKind, RestartSettings};
use std::time::Duration;

/// Delay schedule applied between restarts of a crashed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Same delay before every restart.
    Fixed {
        /// Consecutive failures tolerated before escalating.
        max_attempts: u32,
        delay: Duration,
    },

    /// Doubling delay between restarts.
    Exponential {
        /// Consecutive failures tolerated before escalating.
        max_attempts: u32,
        /// Delay before the first restart.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
    },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_settings(&RestartSettings::default())
    }
}

impl RestartPolicy {
    pub fn from_settings(settings: &RestartSettings) -> Self {
        match settings.policy {
            RestartPolicyKind::Fixed => Self::Fixed {
                max_attempts: settings.max_attempts,
                delay: Duration::from_millis(settings.initial_delay_ms),
            },
            RestartPolicyKind::Exponential => Self::Exponential {
                max_attempts: settings.max_attempts,
                initial_delay: Duration::from_millis(settings.initial_delay_ms),
                max_delay: Duration::from_millis(settings.max_delay_ms),
            },
        }
    }

    /// Create a fixed delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay before restart number `attempt` (1-indexed).
    ///
    /// Returns `None` once `attempt` exceeds `max_attempts`; the module
    /// should then be escalated instead of restarted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts() {
            return None;
        }
        match self {
            Self::Fixed { delay, .. } => Some(*delay),
            Self::Exponential {
                initial_delay,
                max_delay,
                ..
            } => {
                let multiplier = 2u32.saturating_pow(attempt - 1);
                Some(initial_delay.saturating_mul(multiplier).min(*max_delay))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy() {
        let policy = RestartPolicy::fixed(3, Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_default_is_bounded_exponential() {
        let policy = RestartPolicy::default();

        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for_attempt(5), Some(Duration::from_secs(16)));
        assert_eq!(policy.delay_for_attempt(6), None);
    }

    #[test]
    fn test_exponential_caps_at_max() {
        let policy = RestartPolicy::Exponential {
            max_attempts: 20,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };

        assert_eq!(policy.delay_for_attempt(7), Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_for_attempt(20), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_attempts_never_restarts() {
        let settings = RestartSettings {
            policy: RestartPolicyKind::Fixed,
            max_attempts: 0,
            ..RestartSettings::default()
        };

        assert_eq!(RestartPolicy::from_settings(&settings).delay_for_attempt(1), None);
    }
}
