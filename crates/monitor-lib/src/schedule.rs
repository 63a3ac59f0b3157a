//! Periodic background ticks with broadcast-based cancellation

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Handle to one periodic task; cancelling drops the shutdown sender
pub(crate) struct Ticker {
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

impl Ticker {
    pub(crate) fn new() -> Self {
        Self {
            shutdown: Mutex::new(None),
        }
    }

    /// Spawn `tick` every `period`, replacing any previous schedule.
    ///
    /// The first tick fires after one full period. Ticks missed while the
    /// previous one was still running are skipped, never queued.
    pub(crate) fn spawn<F, Fut>(&self, period: Duration, name: &'static str, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut shutdown) = broadcast::channel(1);
        if let Some(previous) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx)
        {
            let _ = previous.send(());
        }

        tokio::spawn(async move {
            info!(task = name, period_ms = period.as_millis() as u64, "Starting periodic task");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Consume the immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick().await;
                    }
                    _ = shutdown.recv() => {
                        debug!(task = name, "Periodic task cancelled");
                        break;
                    }
                }
            }
        });
    }

    /// Cancel the running schedule; returns false if none was active
    pub(crate) fn cancel(&self) -> bool {
        match self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let ticker = Ticker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        ticker.spawn(Duration::from_millis(100), "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(ticker.is_active());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(ticker.cancel());
        assert!(!ticker.is_active());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(!ticker.cancel());
    }
}
