//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Retry strategies shared by session and association supervision."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

/// Delay schedule applied between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Constant delay after every failure.
    Fixed(Duration),
    /// Doubling delay starting at `base`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(8);
                base.saturating_mul(2u32.pow(exponent)).min(max)
            }
        }
    }
}

/// Injectable retry strategy: how many attempts are allowed and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn unbounded(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff,
        }
    }

    /// Broker session default: retry forever, five seconds apart.
    pub fn session_default() -> Self {
        Self::unbounded(Backoff::Fixed(Duration::from_secs(5)))
    }

    /// Network association default: twenty attempts, half a second apart.
    pub fn association_default() -> Self {
        Self::bounded(20, Backoff::Fixed(Duration::from_millis(500)))
    }

    /// Whether attempt number `attempt` (1-indexed) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::session_default()
    }
}
