use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Cooperative stop flag. Single writer (the supervisor), one reader (the component),
/// observed at every suspension point.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sleep for up to `duration`, returning early once the flag is signaled. Sleeps in
/// short slices so even long intervals observe a stop within one poll tick.
pub async fn sleep_observing(duration: Duration, shutdown: &ShutdownFlag) {
    let deadline = Instant::now() + duration;

    loop {
        if shutdown.is_signaled() {
            return;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }

        sleep(remaining.min(POLL_INTERVAL)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_observing_returns_early_on_signal() {
        let shutdown = ShutdownFlag::new();
        shutdown.signal();

        let started = Instant::now();
        sleep_observing(Duration::from_secs(60), &shutdown).await;

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sleep_observing_sleeps_full_duration() {
        let shutdown = ShutdownFlag::new();

        let started = Instant::now();
        sleep_observing(Duration::from_millis(100), &shutdown).await;

        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
