use std::time::{Duration, Instant};

use metricloom::buffer::BackoffPolicy;
use metricloom::context::EngineLimits;

/// Engine limits tightened so integration tests settle in milliseconds.
pub fn fast_limits() -> EngineLimits {
    let mut limits = EngineLimits::default();
    limits.retry_interval = Duration::from_millis(10);
    limits.stop_timeout = Duration::from_millis(500);
    limits.input_idle_interval = Duration::from_millis(2);
    limits.backoff = BackoffPolicy {
        increment: Duration::from_millis(5),
        max: Duration::from_millis(20),
    };
    limits
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub const SETTLE: Duration = Duration::from_secs(3);
