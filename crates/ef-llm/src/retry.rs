use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::LlmError;

/// Capped exponential backoff with jitter (spec §5: base 500ms, cap 30s,
/// jitter ±20%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the initial attempt
    /// (`llm_max_retries` in config).
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Jitter fraction applied symmetrically around the computed delay
    /// (`0.2` = ±20%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Construct a policy with the given retry cap, keeping the spec's
    /// default base/cap/jitter.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Compute the (jittered) delay before retry attempt number `attempt`
    /// (1-indexed: the delay before the first retry is `attempt == 1`).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let raw = self.base.saturating_mul(exp as u32).min(self.cap);
        jitter(raw, self.jitter)
    }
}

fn jitter(duration: Duration, fraction: f64) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-fraction..=fraction);
    let nanos = (duration.as_secs_f64() * factor).max(0.0);
    Duration::from_secs_f64(nanos)
}

/// Run `op` with capped exponential backoff and jitter, retrying up to
/// `policy.max_retries` times on retryable [`LlmError`]s. Returns the last
/// error once the cap is exhausted (spec §4.2, §4.3: "a shard/incident that
/// still fails after retries" is the caller's terminal-failure signal).
pub async fn retry_with_backoff<F, Fut, T>(policy: BackoffPolicy, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, ?delay, error = %err, "retrying LLM call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
