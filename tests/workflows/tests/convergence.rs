use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use testing_framework_core::scenario::{ConvergenceExpectation, Observed, wait_until};
use tokio::time::{Instant, sleep};

const SECOND: Duration = Duration::from_secs(1);

fn expectation(timeout: Duration) -> ConvergenceExpectation<&'static str> {
    ConvergenceExpectation::equals("running")
        .with_timeout(timeout)
        .with_poll_interval(SECOND)
}

/// Observer replaying `script`, then repeating its last entry. `Err` entries
/// become observation errors.
fn scripted(
    script: Vec<Result<&'static str, &'static str>>,
) -> (
    Arc<AtomicU32>,
    impl FnMut() -> std::future::Ready<Result<&'static str, String>>,
) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let observe = move || {
        let index = counter.fetch_add(1, Ordering::SeqCst) as usize;
        let entry = script[index.min(script.len() - 1)];
        std::future::ready(entry.map_err(str::to_owned))
    };
    (calls, observe)
}

#[tokio::test(start_paused = true)]
async fn converges_once_the_value_appears() {
    let started = Instant::now();
    let appears_at = started + Duration::from_secs(3);
    let observe = move || async move {
        Ok::<_, String>(if Instant::now() >= appears_at {
            "running"
        } else {
            "failing"
        })
    };

    let converged = wait_until(observe, &expectation(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(converged.value, "running");
    assert_eq!(converged.attempts, 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn never_matching_fails_at_the_timeout() {
    let (calls, observe) = scripted(vec![Ok("failing")]);
    let started = Instant::now();

    let error = wait_until(observe, &expectation(Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(error.elapsed, Duration::from_secs(5));
    assert_eq!(error.attempts, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(error.last, Some(Observed::Value("failing")));
}

#[tokio::test(start_paused = true)]
async fn failure_is_never_reported_before_the_timeout() {
    let (_, observe) = scripted(vec![Ok("failing")]);
    let timeout = Duration::from_millis(2500);
    let started = Instant::now();

    let error = wait_until(observe, &expectation(timeout)).await.unwrap_err();

    assert_eq!(started.elapsed(), timeout);
    // Attempts at 0s, 1s and 2s; a fourth would start after the deadline.
    assert_eq!(error.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn match_inside_the_final_partial_interval_is_missed() {
    let started = Instant::now();
    let appears_at = started + Duration::from_millis(2200);
    let observe = move || async move {
        Ok::<_, String>(if Instant::now() >= appears_at {
            "running"
        } else {
            "failing"
        })
    };

    let error = wait_until(observe, &expectation(Duration::from_millis(2500)))
        .await
        .unwrap_err();

    assert_eq!(started.elapsed(), Duration::from_millis(2500));
    assert_eq!(error.attempts, 3);
    assert_eq!(error.last, Some(Observed::Value("failing")));
}

#[tokio::test(start_paused = true)]
async fn slow_observations_overrun_by_at_most_one_observation() {
    let latency = Duration::from_millis(1500);
    let timeout = Duration::from_secs(4);
    let started = Instant::now();
    let observe = move || async move {
        sleep(latency).await;
        Ok::<_, String>("failing")
    };

    let error = wait_until(observe, &expectation(timeout)).await.unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= timeout, "{elapsed:?}");
    assert!(elapsed <= timeout + latency, "{elapsed:?}");
    // Back-to-back since each observation outlasts the interval.
    assert_eq!(error.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn observation_errors_count_as_misses() {
    let (calls, observe) = scripted(vec![
        Err("connection refused"),
        Err("connection refused"),
        Ok("running"),
    ]);
    let started = Instant::now();

    let converged = wait_until(observe, &expectation(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(converged.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn persistent_errors_are_reported_as_last_observation() {
    let (_, observe) = scripted(vec![Err("deployment not found")]);

    let error = wait_until(observe, &expectation(Duration::from_secs(2)))
        .await
        .unwrap_err();

    assert_eq!(
        error.last,
        Some(Observed::Failed("deployment not found".to_owned()))
    );
    assert!(
        error
            .to_string()
            .contains("observation error: deployment not found")
    );
}

#[tokio::test(start_paused = true)]
async fn consecutive_matches_restart_on_a_miss() {
    let (calls, observe) = scripted(vec![
        Ok("running"),
        Ok("failing"),
        Ok("running"),
        Ok("running"),
    ]);
    let expectation = expectation(Duration::from_secs(60)).with_consecutive_matches(2);
    let started = Instant::now();

    let converged = wait_until(observe, &expectation).await.unwrap();

    assert_eq!(converged.attempts, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn zero_poll_interval_is_clamped() {
    let (calls, observe) = scripted(vec![Ok("failing")]);
    let expectation = ConvergenceExpectation::equals("running")
        .with_timeout(Duration::from_millis(100))
        .with_poll_interval(Duration::ZERO);

    let error = wait_until(observe, &expectation).await.unwrap_err();

    assert_eq!(expectation.poll_interval(), Duration::from_millis(10));
    // 0ms, 10ms, ..., 100ms.
    assert_eq!(error.attempts, 11);
    assert_eq!(calls.load(Ordering::SeqCst), 11);
}
