// Shared error channel for background components.
//
// Timers, health monitors, archival flushes and workers usually have no
// caller left to return an error to; they push it here instead. The
// bootstrap layer owns the receiving end and decides what is fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

/// Cloneable, non-blocking reporting handle.
///
/// Reporting never suspends the reporting task: when the channel is full the
/// error is logged and counted instead of delivered.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<anyhow::Error>,
    dropped: Arc<AtomicU64>,
}

impl ErrorSink {
    /// Deliver an error to the channel's consumer, best effort.
    pub fn report(&self, err: impl Into<anyhow::Error>) {
        let err = err.into();
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(err)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "error channel full, report dropped");
            }
            Err(mpsc::error::TrySendError::Closed(err)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "error channel closed, report dropped");
            }
        }
    }

    /// Number of reports dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Build a buffered error channel. The sink side is cloned into every
/// background component; the receiver goes to the bootstrap layer.
pub fn error_channel(capacity: usize) -> (ErrorSink, mpsc::Receiver<anyhow::Error>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ErrorSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}
