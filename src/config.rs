//! Client tuning knobs with production defaults and environment overrides.

use std::time::Duration;

use tracing::warn;

/// Reconnect delay policy for the push channel.
///
/// The baseline client waits a fixed interval between attempts; exponential
/// backoff with a cap is available for deployments that want it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectBackoff {
    Fixed,
    Exponential { multiplier: f64, max_delay_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Rides stream poll period.
    pub rides_poll_interval_ms: u64,
    /// Notifications stream poll period.
    pub notifications_poll_interval_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
    /// Consecutive failed push-channel attempts before giving up.
    pub reconnect_max_attempts: u32,
    /// Base delay between push-channel reconnect attempts.
    pub reconnect_delay_ms: u64,
    pub reconnect_backoff: ReconnectBackoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rides_poll_interval_ms: 3_000,
            notifications_poll_interval_ms: 5_000,
            request_timeout_ms: 10_000,
            reconnect_max_attempts: 5,
            reconnect_delay_ms: 3_000,
            reconnect_backoff: ReconnectBackoff::Fixed,
        }
    }
}

impl SyncConfig {
    /// Load from environment with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("RIDESYNC_RIDES_POLL_MS") {
            config.rides_poll_interval_ms = v.parse().unwrap_or(config.rides_poll_interval_ms);
        }
        if let Ok(v) = std::env::var("RIDESYNC_NOTIFICATIONS_POLL_MS") {
            config.notifications_poll_interval_ms =
                v.parse().unwrap_or(config.notifications_poll_interval_ms);
        }
        if let Ok(v) = std::env::var("RIDESYNC_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = v.parse().unwrap_or(config.request_timeout_ms);
        }
        if let Ok(v) = std::env::var("RIDESYNC_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect_max_attempts = v.parse().unwrap_or(config.reconnect_max_attempts);
        }
        if let Ok(v) = std::env::var("RIDESYNC_RECONNECT_DELAY_MS") {
            config.reconnect_delay_ms = v.parse().unwrap_or(config.reconnect_delay_ms);
        }
        if let Ok(v) = std::env::var("RIDESYNC_RECONNECT_BACKOFF") {
            match v.to_ascii_lowercase().as_str() {
                "fixed" => config.reconnect_backoff = ReconnectBackoff::Fixed,
                "exponential" => {
                    config.reconnect_backoff = ReconnectBackoff::Exponential {
                        multiplier: 2.0,
                        max_delay_ms: 60_000,
                    }
                }
                other => warn!(value = other, "unrecognized RIDESYNC_RECONNECT_BACKOFF"),
            }
        }

        config
    }

    pub fn rides_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rides_poll_interval_ms)
    }

    pub fn notifications_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notifications_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
