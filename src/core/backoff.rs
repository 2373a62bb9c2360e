// Backoff between trials
// Delay grows exponentially with the failure streak, with jitter and a hard ceiling

use rand::Rng;
use std::time::Duration;

/// Delay in milliseconds before the next trial
///
/// `min(base * 2^min(failures, cap) * (1 + jitter), max)` where `jitter` is
/// the caller's draw from `[0, jitter_fraction)`.
pub fn compute_delay_ms(
    base_ms: u64,
    consecutive_failures: u32,
    failure_cap: u32,
    jitter: f64,
    max_ms: u64,
) -> u64 {
    let exponent = consecutive_failures.min(failure_cap).min(63);
    let factor = 2f64.powi(exponent as i32);
    let delay = base_ms as f64 * factor * (1.0 + jitter.max(0.0));
    if delay >= max_ms as f64 {
        max_ms
    } else {
        delay as u64
    }
}

/// Backoff parameters taken from the engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
    pub failure_cap: u32,
    pub jitter_fraction: f64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64, failure_cap: u32, jitter_fraction: f64) -> Self {
        Self {
            base_ms,
            max_ms,
            failure_cap,
            jitter_fraction,
        }
    }

    /// Draw a jittered delay for the current failure streak
    pub fn delay<R: Rng + ?Sized>(&self, consecutive_failures: u32, rng: &mut R) -> Duration {
        let jitter = if self.jitter_fraction > 0.0 {
            rng.random_range(0.0..self.jitter_fraction)
        } else {
            0.0
        };
        Duration::from_millis(compute_delay_ms(
            self.base_ms,
            consecutive_failures,
            self.failure_cap,
            jitter,
            self.max_ms,
        ))
    }
}
