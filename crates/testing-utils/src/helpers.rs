//! Polling helpers for asynchronous assertions

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Polls `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

/// Synchronous-condition variant of [`wait_until`]
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    wait_until(|| std::future::ready(condition()), timeout).await
}
