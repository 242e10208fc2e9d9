//! Per-source health state machine
//!
//! Healthy -> Degrading(1..K-1) -> Disabled on the K-th consecutive failure.
//! Any success returns the source to Healthy. A disabled source stays out of
//! the polling set unless a re-enable cool-down is configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Current health of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degrading { failures: u32 },
    Disabled { since: Instant },
}

/// Serializable view of [`HealthState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degrading,
    Disabled,
}

impl HealthState {
    pub fn status(&self) -> HealthStatus {
        match self {
            HealthState::Healthy => HealthStatus::Healthy,
            HealthState::Degrading { .. } => HealthStatus::Degrading,
            HealthState::Disabled { .. } => HealthStatus::Disabled,
        }
    }
}

/// What a recorded outcome did to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    /// Degrading -> Healthy
    Recovered,
    /// Failure below the limit
    Degraded,
    /// Failure limit reached
    Disabled,
    /// Probe after cool-down succeeded
    Reenabled,
}

/// Health tracker for a single source
#[derive(Debug, Clone)]
pub struct SourceHealth {
    state: HealthState,
    max_failures: u32,
    reenable_after: Option<Duration>,
    consecutive_failures: u32,
    total_failures: u64,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl SourceHealth {
    pub fn new(max_failures: u32, reenable_after: Option<Duration>) -> Self {
        Self {
            state: HealthState::Healthy,
            max_failures: max_failures.max(1),
            reenable_after,
            consecutive_failures: 0,
            total_failures: 0,
            last_success: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.state, HealthState::Disabled { .. })
    }

    /// Whether the source should be polled this cycle
    pub fn is_pollable(&self) -> bool {
        match self.state {
            HealthState::Healthy | HealthState::Degrading { .. } => true,
            HealthState::Disabled { since } => self
                .reenable_after
                .is_some_and(|cool_down| since.elapsed() >= cool_down),
        }
    }

    pub fn record_success(&mut self) -> HealthTransition {
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());

        let transition = match self.state {
            HealthState::Healthy => HealthTransition::Unchanged,
            HealthState::Degrading { .. } => HealthTransition::Recovered,
            HealthState::Disabled { .. } => HealthTransition::Reenabled,
        };
        self.state = HealthState::Healthy;
        transition
    }

    pub fn record_failure(&mut self, error: impl Into<String>) -> HealthTransition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_error = Some(error.into());

        match self.state {
            // Failed probe: re-arm the cool-down
            HealthState::Disabled { .. } => {
                self.state = HealthState::Disabled { since: Instant::now() };
                HealthTransition::Unchanged
            }
            _ if self.consecutive_failures >= self.max_failures => {
                self.state = HealthState::Disabled { since: Instant::now() };
                HealthTransition::Disabled
            }
            _ => {
                self.state = HealthState::Degrading {
                    failures: self.consecutive_failures,
                };
                HealthTransition::Degraded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_after_exactly_k_failures() {
        let mut health = SourceHealth::new(5, None);

        for i in 1..5 {
            assert_eq!(health.record_failure("timeout"), HealthTransition::Degraded);
            assert_eq!(health.state(), HealthState::Degrading { failures: i });
            assert!(health.is_pollable());
        }

        assert_eq!(health.record_failure("timeout"), HealthTransition::Disabled);
        assert!(health.is_disabled());
        assert!(!health.is_pollable());
        assert_eq!(health.total_failures(), 5);
    }

    #[test]
    fn test_success_resets_count() {
        let mut health = SourceHealth::new(3, None);

        health.record_failure("a");
        health.record_failure("b");
        assert_eq!(health.record_success(), HealthTransition::Recovered);
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.state(), HealthState::Healthy);

        // Two more failures are not enough after the reset
        health.record_failure("c");
        health.record_failure("d");
        assert!(!health.is_disabled());
        assert_eq!(health.total_failures(), 4);
        assert_eq!(health.last_error(), Some("d"));
    }

    #[test]
    fn test_limit_of_zero_treated_as_one() {
        let mut health = SourceHealth::new(0, None);
        assert_eq!(health.record_failure("boom"), HealthTransition::Disabled);
    }

    #[test]
    fn test_disabled_is_permanent_without_cool_down() {
        let mut health = SourceHealth::new(1, None);
        health.record_failure("boom");
        assert!(!health.is_pollable());
        assert_eq!(health.state().status(), HealthStatus::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cool_down_probe() {
        let cool_down = Duration::from_secs(30);
        let mut health = SourceHealth::new(1, Some(cool_down));

        health.record_failure("boom");
        assert!(!health.is_pollable());

        tokio::time::advance(cool_down).await;
        assert!(health.is_pollable());

        // Failed probe re-arms the cool-down
        assert_eq!(health.record_failure("still down"), HealthTransition::Unchanged);
        assert!(!health.is_pollable());

        tokio::time::advance(cool_down).await;
        assert_eq!(health.record_success(), HealthTransition::Reenabled);
        assert_eq!(health.state(), HealthState::Healthy);
        assert!(health.last_success().is_some());
    }
}
