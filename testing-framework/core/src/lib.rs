pub mod constants;
pub mod deployment;
pub mod scenario;

use std::{ops::Mul as _, sync::LazyLock, time::Duration};

use testing_framework_env as tf_env;

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(tf_env::slow_test_env);

/// In slow test environments like shared CI directors, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV { d.mul(2) } else { d }
}
