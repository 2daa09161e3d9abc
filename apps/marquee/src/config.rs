use std::time::Duration;

use crate::logs::DEFAULT_LOG_CAPACITY;

/// Tunable intervals for session control and tier arbitration. Defaults suit
/// interactive editing; each value has a CLI/env override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Quiet window for coalescing editor saves into one patch batch.
    pub debounce: Duration,
    /// Gap between keepalive pings while a session is held.
    pub keepalive_interval: Duration,
    /// Gap between remote log fetches.
    pub log_poll_interval: Duration,
    /// How long the runtime tier may take to produce a live preview URL.
    pub runtime_start_timeout: Duration,
    /// How long the in-process bundler may take to produce a document.
    pub bundler_timeout: Duration,
    /// Wait after a downgrade before probing a better tier again.
    pub repromote_cooldown: Duration,
    /// Pause before the single session-start retry.
    pub start_retry_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            keepalive_interval: Duration::from_secs(30),
            log_poll_interval: Duration::from_secs(2),
            runtime_start_timeout: Duration::from_secs(10),
            bundler_timeout: Duration::from_secs(5),
            repromote_cooldown: Duration::from_secs(15),
            start_retry_backoff: Duration::from_millis(1500),
        }
    }
}

/// Engine-level policy knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// When false the remote runtime tier is skipped entirely and previews
    /// degrade to the local tiers (offline or cost-capped operation).
    pub runtime_enabled: bool,
    pub timings: Timings,
    /// Capacity of the in-memory remote log tail.
    pub log_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            runtime_enabled: true,
            timings: Timings::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}
