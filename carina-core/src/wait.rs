//! Wait - Poll remote objects until they settle
//!
//! Cloud APIs accept a mutation and finish it asynchronously. Providers
//! describe the expected transition as a set of pending and target states
//! and poll a refresh function until one of the targets is observed.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// State reported when the refreshed object no longer exists
pub const DELETED: &str = "DELETED";

const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(
        "timeout while waiting for state to become '{}' (last state: '{last_state}', timeout: {timeout:?})",
        target.join(", ")
    )]
    Timeout {
        last_state: String,
        target: Vec<String>,
        timeout: Duration,
    },

    #[error("unexpected state '{state}', wanted target '{}'", target.join(", "))]
    UnexpectedState { state: String, target: Vec<String> },

    #[error("couldn't find resource ({retries} retries)")]
    NotFound { retries: u32 },

    #[error("error refreshing state: {0}")]
    Refresh(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Describes one `pending -> target` transition
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Fixed interval between refreshes. When unset, the interval starts at
    /// `min_timeout` and doubles up to 10 seconds.
    pub poll_interval: Option<Duration>,
    pub min_timeout: Duration,
    /// Consecutive "not found" refreshes tolerated before failing
    pub not_found_checks: u32,
    /// Consecutive target observations required
    pub continuous_target_occurrence: u32,
}

impl StateChangeConf {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: None,
            min_timeout: Duration::from_millis(100),
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }

    /// Scale every pause (not the timeout). A factor of zero polls back to back.
    pub fn scaled(mut self, factor: f64) -> Self {
        let factor = factor.max(0.0);
        self.delay = self.delay.mul_f64(factor);
        self.poll_interval = self.poll_interval.map(|p| p.mul_f64(factor));
        self.min_timeout = self.min_timeout.mul_f64(factor);
        self
    }

    /// Poll `refresh` until a target state is reached.
    ///
    /// `refresh` yields `Ok(None)` when the object is gone. That counts as
    /// success when [`DELETED`] is a target, and as a failed lookup otherwise.
    /// On success the last refreshed value is returned (`None` for deletions).
    pub async fn wait_for_state<T, E, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<(T, String)>, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_state = String::new();
        let mut not_found = 0u32;
        let mut occurrences = 0u32;
        let mut backoff = self.min_timeout;

        log::debug!(
            "Waiting for state to become: {:?} (pending: {:?}, timeout: {:?})",
            self.target,
            self.pending,
            self.timeout
        );
        tokio::time::sleep(self.delay.min(deadline.saturating_duration_since(Instant::now()))).await;

        loop {
            let refreshed = refresh().await.map_err(|e| WaitError::Refresh(e.into()))?;

            match refreshed {
                None => {
                    if self.target.iter().any(|t| t == DELETED) {
                        return Ok(None);
                    }
                    occurrences = 0;
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound { retries: not_found });
                    }
                }
                Some((value, state)) => {
                    not_found = 0;
                    if self.target.contains(&state) {
                        occurrences += 1;
                        if occurrences >= self.continuous_target_occurrence {
                            return Ok(Some(value));
                        }
                    } else if self.pending.contains(&state) {
                        occurrences = 0;
                    } else {
                        return Err(WaitError::UnexpectedState {
                            state,
                            target: self.target.clone(),
                        });
                    }
                    log::debug!("Current state: {}", state);
                    last_state = state;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    last_state,
                    target: self.target.clone(),
                    timeout: self.timeout,
                });
            }

            let pause = match self.poll_interval {
                Some(interval) => interval,
                None => {
                    let pause = backoff;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    pause
                }
            };
            tokio::time::sleep(pause.min(deadline - now)).await;
        }
    }
}

/// Run `op`, retrying for as long as it fails with an error accepted by
/// `is_retryable`. Before each retry `wait_ready` is awaited (typically a
/// wait for the parent object to become ACTIVE again), followed by `delay`.
///
/// Once `timeout` has elapsed the last retryable error is returned.
pub async fn retry_while_conflict<T, E, Op, OpFut, R, W, WFut>(
    timeout: Duration,
    delay: Duration,
    mut op: Op,
    is_retryable: R,
    mut wait_ready: W,
) -> Result<T, E>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    W: FnMut() -> WFut,
    WFut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                if Instant::now() >= deadline {
                    return Err(err);
                }
                log::debug!("Attempt {} hit a retryable error: {}", attempt, err);
                wait_ready().await?;
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
