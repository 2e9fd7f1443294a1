//! Exponential backoff used when a broker consumer loses its connection

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any delay in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Reconnect delay calculator with jitter
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_delay_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            next_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Delay to wait before the next reconnect attempt.
    ///
    /// The first call returns the initial delay; each following call grows
    /// it by `multiplier`, capped at `max_delay_ms`.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = self.next_delay_ms.min(self.config.max_delay_ms) as f64;
        let delay = if self.config.jitter_factor > 0.0 {
            let range = base * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-range..=range);
            (base + jitter).max(1.0) as u64
        } else {
            base.max(1.0) as u64
        };

        let grown = (self.next_delay_ms as f64 * self.config.multiplier) as u64;
        self.next_delay_ms = grown.min(self.config.max_delay_ms);

        Duration::from_millis(delay)
    }

    /// Back to the initial delay after a successful reconnect.
    pub fn reset(&mut self) {
        self.next_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
