//! Cooperative cancellation for long-running loops.
//!
//! [`stop_channel`] returns a cloneable [`StopHandle`] for whoever decides
//! when to stop (a Ctrl-C handler, a test) and a [`StopSignal`] for the loop
//! that has to observe it.  Stopping is sticky: once requested it stays
//! requested.

use std::sync::Arc;

use tokio::sync::watch;

/// Requests a stop.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes stop requests.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

impl StopHandle {
    pub fn stop(&self) {
        // send_replace succeeds even when every signal has been dropped
        self.tx.send_replace(true);
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested.
    ///
    /// If every [`StopHandle`] is dropped without stopping, this never
    /// resolves.
    pub async fn stopped(&mut self) {
        let closed = self.rx.wait_for(|stopped| *stopped).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_is_observed_by_every_signal() {
        let (handle, mut signal) = stop_channel();
        let other = signal.clone();
        assert!(!signal.is_stopped());

        handle.clone().stop();
        signal.stopped().await;
        assert!(signal.is_stopped());
        assert!(other.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_stops() {
        let (handle, mut signal) = stop_channel();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_secs(60), signal.stopped()).await;
        assert!(waited.is_err());
        assert!(!signal.is_stopped());
    }
}
