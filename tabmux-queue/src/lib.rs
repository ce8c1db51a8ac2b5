//! # tabmux-queue — per-session FIFO request serializer
//!
//! Every browser operation tagged with a session id runs through exactly
//! one [`QueueManager`]. Operations for the same session never run
//! concurrently with each other; operations for different sessions run
//! fully in parallel. There is no cross-session lock.

#![deny(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tabmux_core::SessionId;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors raised by the queue.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The item was rejected because `deleteQueue` ran before it executed.
    #[error("queue item cancelled: session queue was deleted")]
    Cancelled,

    /// The enqueued work's own future was dropped without completing
    /// (the processor task was aborted or panicked).
    #[error("queue item dropped before completion")]
    Dropped,
}

type BoxedOp = Box<dyn FnOnce(bool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct SessionQueueState {
    items: VecDeque<BoxedOp>,
    processing: bool,
}

struct SessionQueue {
    state: Mutex<SessionQueueState>,
}

impl SessionQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionQueueState {
                items: VecDeque::new(),
                processing: false,
            }),
        })
    }

    fn push(self: &Arc<Self>, item: BoxedOp) {
        let mut guard = self.state.lock().unwrap();
        guard.items.push_back(item);
        let need_spawn = !guard.processing;
        if need_spawn {
            guard.processing = true;
        }
        drop(guard);
        if need_spawn {
            tokio::spawn(Self::run(self.clone()));
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            let item = {
                let mut guard = self.state.lock().unwrap();
                match guard.items.pop_front() {
                    Some(item) => item,
                    None => {
                        guard.processing = false;
                        break;
                    }
                }
            };
            item(false).await;
        }
    }

    /// Drain every pending item, rejecting each with [`QueueError::Cancelled`].
    fn drain_cancelled(&self) {
        let mut guard = self.state.lock().unwrap();
        let drained: Vec<_> = guard.items.drain(..).collect();
        drop(guard);
        for item in drained {
            tokio::spawn(item(true));
        }
    }

    fn pending(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    fn is_processing(&self) -> bool {
        self.state.lock().unwrap().processing
    }
}

/// Serializes per-session async work while allowing full cross-session
/// parallelism.
///
/// Cloning a `QueueManager` is cheap and shares the same underlying session
/// table (it wraps an `Arc` internally); there is normally exactly one
/// instance per running core.
#[derive(Clone)]
pub struct QueueManager {
    sessions: Arc<Mutex<HashMap<SessionId, Arc<SessionQueue>>>>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    /// Create an empty queue manager.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn queue_for(&self, session: &SessionId) -> Arc<SessionQueue> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session.clone())
            .or_insert_with(SessionQueue::new)
            .clone()
    }

    /// Enqueue `work` for `session` and return its eventual result.
    ///
    /// `work` runs strictly after every item already queued for this
    /// session, and strictly before every item enqueued after this call
    /// returns. Items for other sessions may run concurrently with it.
    pub async fn enqueue<F, Fut, T>(&self, session: &SessionId, work: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T, QueueError>>();
        let boxed: BoxedOp = Box::new(move |cancelled: bool| {
            Box::pin(async move {
                if cancelled {
                    let _ = tx.send(Err(QueueError::Cancelled));
                } else {
                    let result = work().await;
                    let _ = tx.send(Ok(result));
                }
            })
        });

        let queue = self.queue_for(session);
        queue.push(boxed);

        rx.await.unwrap_or(Err(QueueError::Dropped))
    }

    /// Reject every pending item for `session` with [`QueueError::Cancelled`]
    /// and drop the session's queue. Items already in flight are not
    /// cancelled; they run to completion and their result is simply
    /// unobserved by anyone still holding a receiver for them.
    pub fn delete_queue(&self, session: &SessionId) {
        let queue = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.remove(session)
        };
        if let Some(queue) = queue {
            queue.drain_cancelled();
        }
    }

    /// Number of items waiting (not counting one currently executing) for
    /// `session`.
    pub fn pending(&self, session: &SessionId) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(session).map(|q| q.pending()).unwrap_or(0)
    }

    /// Whether `session` currently has a processor running (an item either
    /// executing or about to be popped).
    pub fn is_processing(&self, session: &SessionId) -> bool {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session)
            .map(|q| q.is_processing())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[tokio::test]
    async fn fifo_within_one_session() {
        let qm = QueueManager::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        let t1 = trace.clone();
        let fut1 = qm.enqueue(&sid("A"), move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            t1.lock().unwrap().push("A1");
        });
        let t2 = trace.clone();
        let fut2 = qm.enqueue(&sid("A"), move || async move {
            t2.lock().unwrap().push("A2");
        });

        let (r1, r2) = tokio::join!(fut1, fut2);
        r1.unwrap();
        r2.unwrap();

        assert_eq!(*trace.lock().unwrap(), vec!["A1", "A2"]);
    }

    #[tokio::test]
    async fn cross_session_parallelism() {
        let qm = QueueManager::new();
        let trace = Arc::new(StdMutex::new(Vec::new()));

        let ta = trace.clone();
        let slow = qm.enqueue(&sid("A"), move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ta.lock().unwrap().push("A1");
        });
        let tb = trace.clone();
        let fast = qm.enqueue(&sid("B"), move || async move {
            tb.lock().unwrap().push("B1");
        });

        let (r1, r2) = tokio::join!(slow, fast);
        r1.unwrap();
        r2.unwrap();

        let trace = trace.lock().unwrap();
        let pos_b = trace.iter().position(|x| *x == "B1").unwrap();
        let pos_a = trace.iter().position(|x| *x == "A1").unwrap();
        assert!(pos_b < pos_a, "B1 should complete before A1: {trace:?}");
    }

    #[tokio::test]
    async fn delete_queue_cancels_pending_items() {
        let qm = QueueManager::new();
        let session = sid("A");

        let blocking = qm.enqueue(&session, || async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        let pending = qm.enqueue(&session, || async move { 1u32 });

        // give the first item a moment to start running so the second is
        // genuinely queued, not raced against delete_queue.
        tokio::time::sleep(Duration::from_millis(10)).await;
        qm.delete_queue(&session);

        assert_eq!(pending.await, Err(QueueError::Cancelled));
        blocking.await.unwrap();
    }

    #[tokio::test]
    async fn pending_and_is_processing_report_state() {
        let qm = QueueManager::new();
        let session = sid("A");
        assert_eq!(qm.pending(&session), 0);
        assert!(!qm.is_processing(&session));

        let fut = qm.enqueue(&session, || async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(qm.is_processing(&session));
        fut.await.unwrap();
    }
}
