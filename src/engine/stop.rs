//! Cooperative cancellation signal for walks.

use tokio::sync::watch;

/// The sending half of the stop signal. Owned by the engine; closing it
/// asks every in-flight evaluation to wind down at its next suspension
/// point.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Creates a handle and a signal observers can clone.
    #[must_use]
    pub fn new() -> (Self, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, StopSignal { rx })
    }

    /// Signals every observer to stop.
    pub fn stop(&self) {
        // Receivers may all be gone once a walk ends; that is fine.
        let _ = self.tx.send(true);
    }
}

/// The observing half of the stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Returns true once stop has been signalled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until stop is signalled. Returns immediately if it already
    /// was.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
