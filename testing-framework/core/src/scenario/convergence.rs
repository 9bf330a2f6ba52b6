use std::{
    fmt::{self, Debug, Display},
    future::Future,
    time::Duration,
};

use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::constants;

/// Lower bound applied to poll intervals so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// What a wait-step is waiting for, and for how long.
pub struct ConvergenceExpectation<T> {
    description: String,
    predicate: Predicate<T>,
    timeout: Duration,
    poll_interval: Duration,
    consecutive_matches: u32,
}

impl<T> ConvergenceExpectation<T> {
    /// Wait until `predicate` holds, using the configured default timeout and
    /// poll interval.
    #[must_use]
    pub fn matching(
        description: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Box::new(predicate),
            timeout: constants::convergence_timeout(),
            poll_interval: constants::poll_interval(),
            consecutive_matches: 1,
        }
    }

    /// Wait until the observed value equals `expected`.
    #[must_use]
    pub fn equals(expected: T) -> Self
    where
        T: PartialEq + Debug + Send + Sync + 'static,
    {
        let description = format!("value == {expected:?}");
        Self::matching(description, move |value| *value == expected)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Require `count` matching observations in a row; any miss restarts the
    /// streak.
    #[must_use]
    pub fn with_consecutive_matches(mut self, count: u32) -> Self {
        self.consecutive_matches = count.max(1);
        self
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn matches(&self, value: &T) -> bool {
        (self.predicate)(value)
    }
}

impl<T> Debug for ConvergenceExpectation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergenceExpectation")
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("consecutive_matches", &self.consecutive_matches)
            .finish_non_exhaustive()
    }
}

/// Result of a single observation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observed<T> {
    Value(T),
    Failed(String),
}

impl<T: Debug> Display for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value:?}"),
            Self::Failed(error) => write!(f, "observation error: {error}"),
        }
    }
}

/// Successful convergence.
#[derive(Clone, Debug)]
pub struct Converged<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// The expected state was never reached within the timeout.
#[derive(Debug, Error)]
#[error(
    "{expectation} not observed within {timeout:?} (elapsed {elapsed:?} over {attempts} attempts, last observed: {last_seen})",
    last_seen = render_last(.last.as_ref())
)]
pub struct ConvergenceError<T: Debug> {
    pub expectation: String,
    pub timeout: Duration,
    pub elapsed: Duration,
    pub attempts: u32,
    pub last: Option<Observed<T>>,
}

fn render_last<T: Debug>(last: Option<&Observed<T>>) -> String {
    last.map_or_else(|| "nothing".to_owned(), ToString::to_string)
}

/// Poll `observe` until `expectation` is met or its timeout elapses.
///
/// One observation is in flight at a time and attempts start at least one
/// poll interval apart. Observation errors count as misses. A zero timeout
/// performs exactly one attempt. On failure the call returns no earlier than
/// the timeout and no later than the timeout plus one observation.
///
/// No attempt starts once the next interval boundary lies past the deadline,
/// so a value that only starts matching inside that final partial interval is
/// never observed: with a 2.5s timeout and a 1s interval, a match appearing at
/// 2.2s still fails at 2.5s. Size the timeout with one poll interval of slack.
pub async fn wait_until<T, E, F, Fut>(
    mut observe: F,
    expectation: &ConvergenceExpectation<T>,
) -> Result<Converged<T>, ConvergenceError<T>>
where
    T: Debug,
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let deadline = started + expectation.timeout;
    let mut attempts = 0u32;
    let mut streak = 0u32;
    let mut last = None;

    info!(
        expectation = expectation.description(),
        timeout_secs = expectation.timeout.as_secs_f32(),
        poll_ms = expectation.poll_interval.as_millis(),
        "waiting for convergence"
    );

    loop {
        let attempt_started = Instant::now();
        attempts += 1;

        match observe().await {
            Ok(value) => {
                let matched = expectation.matches(&value);
                debug!(attempt = attempts, observed = ?value, matched, "observation");
                if matched {
                    streak += 1;
                    if streak >= expectation.consecutive_matches {
                        let elapsed = started.elapsed();
                        info!(
                            expectation = expectation.description(),
                            attempts,
                            elapsed_ms = elapsed.as_millis(),
                            "converged"
                        );
                        return Ok(Converged {
                            value,
                            attempts,
                            elapsed,
                        });
                    }
                } else {
                    streak = 0;
                }
                last = Some(Observed::Value(value));
            }
            Err(error) => {
                streak = 0;
                debug!(attempt = attempts, %error, "observation failed");
                last = Some(Observed::Failed(error.to_string()));
            }
        }

        let next_attempt = attempt_started + expectation.poll_interval;
        if next_attempt > deadline || Instant::now() >= deadline {
            sleep_until(deadline).await;
            let error = ConvergenceError {
                expectation: expectation.description().to_owned(),
                timeout: expectation.timeout,
                elapsed: started.elapsed(),
                attempts,
                last,
            };
            warn!(%error, "convergence timed out");
            return Err(error);
        }

        sleep_until(next_attempt).await;
    }
}
