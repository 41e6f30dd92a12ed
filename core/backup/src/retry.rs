//! Backoff policy for re-sending an update after a transient failure.
//!
//! Only updates go through here: re-uploading the same archive to the same
//! remote object is idempotent, while a repeated create could leave a
//! second copy behind.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use driveback_common::Result;

/// How often and how patiently a failed update is retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    /// Pause before the first retry. Doubles for every further retry.
    pub initial_delay: Duration,
    /// Ceiling for the doubled pause.
    pub max_delay: Duration,
    /// Spread each pause over 75%..125% of its nominal length.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let nominal = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);

        if self.jitter {
            nominal.mul_f64(0.75 + rand::random::<f64>() * 0.5)
        } else {
            nominal
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Re-runs an operation while it fails with a transient error.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying failures that
    /// [`is_transient`](driveback_common::Error::is_transient) with
    /// exponential backoff. Once retries run out the last error is returned.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retry > 0 {
                        debug!("Update went through after {} retries", retry);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() || retry >= self.config.max_retries {
                if retry > 0 {
                    warn!("Giving up after {} retries: {}", retry, err);
                }
                return Err(err);
            }

            let delay = self.config.backoff(retry);
            retry += 1;
            warn!(
                "Transient failure ({}); retry {}/{} in {:?}",
                err, retry, self.config.max_retries, delay
            );
            sleep(delay).await;
        }
    }
}
