use std::{fmt::Debug, future::Future, time::Duration};

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::{Error, Result};

/// What to do when a probe itself fails, as opposed to reporting "not yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Treat the failure as "not yet" and keep polling. The last failure is
    /// reported if it happened on the final tick.
    #[default]
    RetryOnError,
    /// Abort polling and surface the failure as [`Error::ProbeFailed`].
    FailOnError,
}

/// Shortest interval between checks. Anything shorter is raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// The condition is checked immediately, then once per interval. The last
/// check happens at the deadline itself, so a wait never ends later than
/// `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
    pub policy: ErrorPolicy,
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        PollSpec {
            interval: interval.max(MIN_INTERVAL),
            timeout,
            policy: ErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll `probe` until it returns `Ok(true)`.
    ///
    /// Errors that can never resolve by waiting (see [`is_fatal`]) abort the
    /// wait regardless of policy.
    pub async fn until<F, Fut>(&self, description: &str, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut last = None;

        loop {
            match probe().await {
                Ok(true) => {
                    info!("ok {description} after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(false) => {
                    debug!("waiting for {description}");
                    last = None;
                }
                Err(err) if is_fatal(&err) => {
                    error!("aborting wait for {description}: {err}");
                    return Err(err);
                }
                Err(err) => match self.policy {
                    ErrorPolicy::RetryOnError => {
                        debug!("probe for {description} failed, retrying: {err}");
                        last = Some(err.to_string());
                    }
                    ErrorPolicy::FailOnError => {
                        error!("probe for {description} failed: {err}");
                        return Err(Error::ProbeFailed {
                            description: description.to_string(),
                            source: Box::new(err),
                        });
                    }
                },
            }

            if !self.sleep_until_next(deadline).await {
                error!("timeout {description}");
                return Err(Error::Timeout {
                    description: description.to_string(),
                    timeout: self.timeout,
                    last,
                });
            }
        }
    }

    /// Poll `probe` until it produces a value. `Err(reason)` means "not yet",
    /// and the most recent reason is reported if the wait times out.
    pub async fn until_ok<T, F, Fut>(&self, description: &str, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;

        loop {
            let reason = match probe().await {
                Ok(value) => {
                    info!("ok {description} after {:?}", start.elapsed());
                    return Ok(value);
                }
                Err(reason) => reason,
            };

            debug!("waiting for {description}: {reason}");

            if !self.sleep_until_next(deadline).await {
                error!("timeout {description}: {reason}");
                return Err(Error::Timeout {
                    description: description.to_string(),
                    timeout: self.timeout,
                    last: Some(reason),
                });
            }
        }
    }

    /// Sample a value until `matches` accepts it, returning the accepted value.
    ///
    /// This is the value-matching flavour of [`PollSpec::until`]: the sampler
    /// cannot fail, so the timeout error carries the last sampled value.
    pub async fn until_value<T, F, Fut, M>(
        &self,
        description: &str,
        mut sample: F,
        matches: M,
    ) -> Result<T>
    where
        T: Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        M: Fn(&T) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;

        loop {
            let value = sample().await;

            if matches(&value) {
                info!("ok {description}: {value:?}");
                return Ok(value);
            }

            debug!("waiting for {description}, got {value:?}");

            if !self.sleep_until_next(deadline).await {
                error!("timeout {description}, last value {value:?}");
                return Err(Error::Timeout {
                    description: description.to_string(),
                    timeout: self.timeout,
                    last: Some(format!("{value:?}")),
                });
            }
        }
    }

    /// Sleeps until the next tick, returning `false` once the deadline has
    /// already been reached.
    async fn sleep_until_next(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        tokio::time::sleep(self.interval.min(deadline - now)).await;
        true
    }
}

/// Poll `probe` every `interval` until it succeeds or `timeout` elapses.
/// `policy` decides whether errors end the wait.
pub async fn poll<F, Fut>(
    interval: Duration,
    timeout: Duration,
    policy: ErrorPolicy,
    probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    PollSpec::new(interval, timeout)
        .with_policy(policy)
        .until("condition", probe)
        .await
}

/// Errors that waiting longer cannot fix.
pub fn is_fatal(err: &Error) -> bool {
    matches!(
        err,
        Error::Degraded { .. } | Error::MaxUnavailableExceeded { .. }
    )
}

/// Escalate a failed wait into a test failure carrying `context`.
#[track_caller]
pub fn assert_wait_poll_no_err<T>(result: Result<T>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{context}: {err}"),
    }
}
