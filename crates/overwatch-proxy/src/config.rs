//! Per-core runtime configuration.

use overwatch_core::FailMode;
use overwatch_transport::FramingLimits;
use std::collections::HashMap;
use std::time::Duration;

use crate::breaker::BreakerConfig;

/// Upstream recovery settings.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    /// Whether the core restarts a failed upstream.
    pub enabled: bool,
    /// Restart attempts before giving up.
    pub max_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
        }
    }
}

impl RecoveryConfig {
    /// Backoff before attempt `n` (1-based):
    /// `min(1000 * 2^(n-1), 16000)` milliseconds.
    #[must_use]
    pub fn delay_for_attempt(self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(1000u64.saturating_mul(factor).min(16_000))
    }
}

/// Everything one proxy core needs to run.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Server name, used in policy lookups, audit, and events.
    pub server_name: String,
    /// Upstream executable.
    pub command: String,
    /// Upstream arguments.
    pub args: Vec<String>,
    /// Operator environment overrides, merged in after sanitization.
    pub env: HashMap<String, String>,
    /// Posture when policy or upstream cannot be consulted.
    pub fail_mode: FailMode,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Interval of the safety-net sweep over pending requests.
    pub sweep_interval: Duration,
    /// Largest message relayed in either direction.
    pub max_message_size: usize,
    /// Transport buffer and header limits.
    pub limits: FramingLimits,
    /// Upstream recovery settings.
    pub recovery: RecoveryConfig,
    /// Circuit breaker settings.
    pub breaker: BreakerConfig,
}

impl ProxyConfig {
    /// A config with spec defaults for the given server and command.
    #[must_use]
    pub fn new(server_name: impl Into<String>, command: impl Into<String>) -> Self {
        let limits = FramingLimits::default();
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            fail_mode: FailMode::Closed,
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            max_message_size: limits.max_message_size,
            limits,
            recovery: RecoveryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }

    /// Framing limits for the relay transports.
    ///
    /// The configured message limit is enforced by the proxy itself
    /// (`REQUEST_TOO_LARGE` for client requests, an event for upstream
    /// messages); the transports parse up to the buffer bound so an
    /// oversized upstream message can still be observed and relayed.
    #[must_use]
    pub fn relay_limits(&self) -> FramingLimits {
        FramingLimits {
            max_message_size: self.limits.max_buffer_size,
            ..self.limits
        }
    }
}
