//! Bounded retry for transient platform errors.
use crate::config::RetrySettings;
use crate::platform::PlatformError;
use std::time::Duration;

/// Exponential backoff: `initial * multiplier^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(retry);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying only transient failures.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

/// Polling applied after a create until the resource is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub checks: u32,
    pub interval: Duration,
}

impl ReadinessPolicy {
    /// Poll `probe` until it reports `true`. Errors end the wait.
    pub fn wait(
        &self,
        mut probe: impl FnMut() -> Result<bool, PlatformError>,
    ) -> Result<bool, PlatformError> {
        let checks = self.checks.max(1);
        for check in 1..=checks {
            if probe()? {
                return Ok(true);
            }
            if check < checks {
                std::thread::sleep(self.interval);
            }
        }
        Ok(false)
    }
}

impl From<&RetrySettings> for ReadinessPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            checks: settings.ready_checks,
            interval: Duration::from_millis(settings.ready_interval_ms),
        }
    }
}

impl ReadinessPolicy {
    /// The longer wait used for kinds that start asynchronously.
    pub fn startup(settings: &RetrySettings) -> Self {
        Self {
            checks: settings.startup_checks,
            interval: Duration::from_millis(settings.startup_interval_ms),
        }
    }
}
