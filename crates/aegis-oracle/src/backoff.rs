//! Shared exponential-backoff retry helper (§4.3), used by both the ML
//! scorer and the LLM analyzer call sites.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// `initial` delay, doubling by `factor` each attempt, capped at
/// `max_attempts` tries or an `overall_budget` wall-clock ceiling,
/// whichever comes first.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    pub overall_budget: Duration,
}

/// Run `f` until it succeeds, the attempt budget is exhausted, or the
/// overall time budget elapses. Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &BackoffPolicy, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_with_backoff_unless(policy, |_| false, f).await
}

/// Same as [`retry_with_backoff`], but `is_permanent` is consulted after
/// every failed attempt: when it returns `true` the retry loop stops
/// immediately instead of waiting for the attempt/time budget to run out.
/// Used to distinguish a transient oracle failure (retry, then degrade)
/// from a permanent one (e.g. a schema mismatch) that retrying can never
/// fix.
pub async fn retry_with_backoff_unless<F, Fut, T, E>(
    policy: &BackoffPolicy,
    is_permanent: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let deadline = Instant::now() + policy.overall_budget;
    let mut delay = policy.initial;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let exhausted = is_permanent(&e)
                    || attempt >= policy.max_attempts
                    || Instant::now() + delay >= deadline;
                if exhausted {
                    return Err(e);
                }
                sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * policy.factor);
            }
        }
    }
}
