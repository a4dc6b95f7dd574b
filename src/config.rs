use clap::Args;
use std::time::Duration;

/// Tuning for the transaction processing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Failed submissions allowed before a transaction is failed for good.
    pub max_retries: u32,
    /// Delay before the first retry; doubles with every further failure.
    pub retry_backoff: Duration,
    /// Deadline for a single processor call. Elapsing counts as a recoverable failure.
    pub submit_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Backoff to wait after the `failures`-th failure before retrying.
    pub fn backoff_after(&self, failures: usize) -> Duration {
        let exponent = failures.saturating_sub(1).min(16) as u32;
        self.retry_backoff.saturating_mul(2u32.pow(exponent))
    }
}

/// Command line / environment form of [`EngineConfig`].
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Failed submissions allowed before a transaction is failed permanently
    #[arg(long, env = "BILLING_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,

    /// Base retry backoff in seconds (doubles after every failure)
    #[arg(long, env = "BILLING_RETRY_BACKOFF_SECS", default_value_t = 60)]
    pub retry_backoff_secs: u64,

    /// Deadline for a single processor submission in seconds
    #[arg(long, env = "BILLING_SUBMIT_TIMEOUT_SECS", default_value_t = 30)]
    pub submit_timeout_secs: u64,
}

impl From<EngineArgs> for EngineConfig {
    fn from(args: EngineArgs) -> Self {
        Self {
            max_retries: args.max_retries,
            retry_backoff: Duration::from_secs(args.retry_backoff_secs),
            submit_timeout: Duration::from_secs(args.submit_timeout_secs),
        }
    }
}
