use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between send attempts evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay after every failure.
    #[default]
    Fixed,
    /// Delay doubles after every failure, capped at the configured maximum.
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Exhausted,
}

/// Bounded retry policy for a batch.
///
/// `max_retries` is the total number of send attempts a batch gets: once that
/// many have failed, the batch is escalated and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff: RetryBackoff,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            backoff: RetryBackoff::Fixed,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff: RetryBackoff::Exponential,
        }
    }

    pub fn new(
        backoff: RetryBackoff,
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        match backoff {
            RetryBackoff::Fixed => Self::fixed(max_retries, base_delay),
            RetryBackoff::Exponential => Self::exponential(max_retries, base_delay, max_delay),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> RetryBackoff {
        self.backoff
    }

    /// Decide what happens after the `failed_attempts`-th failure.
    pub fn decide(&self, failed_attempts: u32) -> RetryDecision {
        if failed_attempts >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            delay: self.delay_after(failed_attempts),
        }
    }

    fn delay_after(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.base_delay,
            RetryBackoff::Exponential => {
                let doublings = failed_attempts.saturating_sub(1).min(20);
                self.base_delay
                    .saturating_mul(1_u32 << doublings)
                    .min(self.max_delay)
            }
        }
    }
}
