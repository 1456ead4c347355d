//! Cancellable background jobs that wrap the duplicate resolver.
//!
//! A job runs on the tokio runtime and reports back through a stream of
//! [`JobEvent`]s: any number of `Progress` events followed by exactly one
//! terminal event (`Finished`, `Cancelled` or `Failed`).
//!
//! Cancellation is cooperative. Jobs poll their [`CancelToken`] at every
//! per-file step; the in-memory resolution step is never interrupted.

pub mod duplicate_delete;
pub mod duplicate_scan;

use futures::stream::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub use duplicate_delete::{DeleteMode, DeleteReport, DuplicateDeleteJob, deletion_candidates};
pub use duplicate_scan::DuplicateScanJob;

/// Channel capacity for job events.
const EVENT_BUFFER: usize = 100;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Events emitted by a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent<T> {
    /// `total` is 0 while the amount of work is still unknown
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    Finished(T),
    Cancelled,
    Failed(String),
}

impl<T> JobEvent<T> {
    pub fn progress(current: usize, total: usize, message: impl Into<String>) -> Self {
        Self::Progress {
            current,
            total,
            message: message.into(),
        }
    }

    /// Whether this event ends the job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Sending half handed to a job body.
///
/// Send failures mean the consumer dropped the stream; jobs treat that as
/// cancellation.
#[derive(Debug)]
pub(crate) struct EventSender<T> {
    tx: mpsc::Sender<JobEvent<T>>,
    token: CancelToken,
}

impl<T> EventSender<T> {
    pub(crate) async fn send(&self, event: JobEvent<T>) {
        if self.tx.send(event).await.is_err() {
            self.token.cancel();
        }
    }

    pub(crate) async fn progress(&self, current: usize, total: usize, message: impl Into<String>) {
        self.send(JobEvent::progress(current, total, message)).await;
    }
}

/// Spawn a job body and expose its events as a `Stream`.
pub(crate) fn spawn_job<T, F, Fut>(token: CancelToken, body: F) -> impl Stream<Item = JobEvent<T>>
where
    T: Send + 'static,
    F: FnOnce(EventSender<T>, CancelToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let sender = EventSender {
        tx,
        token: token.clone(),
    };
    tokio::spawn(body(sender, token));

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
}
