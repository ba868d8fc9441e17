//! Cooperative cancellation for the fetcher loop.
//!
//! No corpus example pulls in `tokio-util`'s `CancellationToken`, so this is
//! built directly on `tokio::sync::watch`, mirroring the shape of the
//! original's `sleepContext` racing `time.After` against `ctx.Done()`.

use core::time::Duration;
use tokio::sync::watch;

/// Signals that a graceful shutdown has been requested.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Error returned by [`sleep_cancellable`] when shutdown fires before the
/// sleep elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl Shutdown {
    /// Creates a new shutdown signal pair. The sender side should be held by
    /// `main` and fired on `ctrl_c()`.
    #[must_use]
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until shutdown is requested.
    pub async fn requested(&mut self) {
        if self.is_requested() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

/// Sleeps for `duration`, returning early with [`Cancelled`] if shutdown
/// fires first.
pub async fn sleep_cancellable(shutdown: &mut Shutdown, duration: Duration) -> Result<(), Cancelled> {
    if shutdown.is_requested() {
        return Err(Cancelled);
    }

    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = shutdown.requested() => Err(Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_without_shutdown() {
        let (_tx, mut shutdown) = Shutdown::new();
        let result = sleep_cancellable(&mut shutdown, Duration::from_millis(10)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sleep_cancelled_by_shutdown() {
        let (tx, mut shutdown) = Shutdown::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });

        let result = sleep_cancellable(&mut shutdown, Duration::from_secs(60)).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn already_requested_shutdown_cancels_immediately() {
        let (tx, mut shutdown) = Shutdown::new();
        let _ = tx.send(true);

        let result = sleep_cancellable(&mut shutdown, Duration::from_secs(60)).await;
        assert_eq!(result, Err(Cancelled));
    }
}
