//! Timer handles.

use std::time::Duration;

use tokio::sync::watch;

/// Handle for a running polling timer.
///
/// Dropping the handle stops the timer. A request the timer already issued
/// is not cancelled.
#[derive(Debug)]
pub struct TimerHandle {
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl TimerHandle {
    pub(crate) fn new(interval: Duration) -> (Self, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                interval,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Returns the polling period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signals the timer to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns true once the timer was told to stop or its task ended.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow() || self.shutdown_tx.is_closed()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
