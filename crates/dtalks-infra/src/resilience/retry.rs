//! Retry policies
//!
//! Exponential backoff for service calls and uniformly jittered delays for
//! socket reconnects.

use rand::Rng;
use std::time::Duration;

/// How the wait before each retry is chosen
#[derive(Debug, Clone, PartialEq)]
pub enum DelayStrategy {
    /// `initial * multiplier^(attempt-1)`, capped, with +/- jitter
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        /// Fraction of the delay to jitter by (0.0 to 1.0)
        jitter_factor: f64,
    },
    /// Same wait every time
    Fixed(Duration),
    /// Uniformly random wait in `[min, max]`
    Uniform { min: Duration, max: Duration },
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries (0 means no retries)
    pub max_retries: u32,
    pub strategy: DelayStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: DelayStrategy::Exponential {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(5),
                multiplier: 2.0,
                jitter_factor: 0.3,
            },
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with the default timings
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: DelayStrategy::Fixed(delay),
        }
    }

    /// Random wait between `min` and `max` before each retry
    pub fn uniform(max_retries: u32, min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            max_retries,
            strategy: DelayStrategy::Uniform { min, max },
        }
    }

    pub fn from_secs_range(max_retries: u32, min_secs: f64, max_secs: f64) -> Self {
        Self::uniform(
            max_retries,
            Duration::from_secs_f64(min_secs.max(0.0)),
            Duration::from_secs_f64(max_secs.max(0.0)),
        )
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate the delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match &self.config.strategy {
            DelayStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
                jitter_factor,
            } => {
                let base = initial_delay
                    .mul_f64(multiplier.powi((attempt - 1) as i32))
                    .min(*max_delay);
                jitter(base, *jitter_factor)
            }
            DelayStrategy::Fixed(delay) => *delay,
            DelayStrategy::Uniform { min, max } => {
                if min == max {
                    *min
                } else {
                    rand::thread_rng().gen_range(*min..=*max)
                }
            }
        }
    }

    /// Check if we should retry for a given attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

fn jitter(delay: Duration, factor: f64) -> Duration {
    let range = delay.mul_f64(factor.clamp(0.0, 1.0));
    if range.is_zero() {
        return delay;
    }
    let mut rng = rand::thread_rng();
    let offset = rng.gen_range(Duration::ZERO..range);
    if rng.gen_bool(0.5) {
        delay + offset
    } else {
        delay.saturating_sub(offset)
    }
}

/// Retry with a custom predicate
pub async fn retry_with<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.config.max_retries || !should_retry(&e) {
                    return Err(e);
                }
                attempt += 1;
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}
