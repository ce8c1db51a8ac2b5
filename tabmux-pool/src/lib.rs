//! # tabmux-pool — debugger connection pool
//!
//! Owns the attach/detach lifecycle of the debugger channel for every
//! `(session, tab)` pair. Concurrent attach attempts for the same pair
//! coalesce onto a single underlying attach call; a call that fails
//! because the browser detached mid-flight gets one automatic
//! reattach-and-retry before the failure is surfaced to the caller.

#![deny(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use tabmux_core::{CdpTransport, SessionId, TabId, TransportError};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by the connection pool.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PoolError {
    /// The connection detached mid-call and the automatic reattach+retry
    /// also failed.
    #[error("connection to tab {0} detached and could not be recovered")]
    Detached(TabId),

    /// The underlying transport reported an error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Default)]
struct ConnState {
    attached: bool,
}

type Key = (SessionId, TabId);

/// Pools debugger connections across every session and tab.
pub struct ConnectionPool {
    transport: Arc<dyn CdpTransport>,
    conns: Mutex<HashMap<Key, Arc<Mutex<ConnState>>>>,
}

impl ConnectionPool {
    /// Build a pool backed by `transport`.
    pub fn new(transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            transport,
            conns: Mutex::new(HashMap::new()),
        }
    }

    async fn conn_for(&self, session: &SessionId, tab: TabId) -> Arc<Mutex<ConnState>> {
        let mut conns = self.conns.lock().await;
        conns
            .entry((session.clone(), tab))
            .or_insert_with(|| Arc::new(Mutex::new(ConnState::default())))
            .clone()
    }

    /// Attach the debugger to `tab` for `session`. Idempotent: if already
    /// attached this returns immediately; if another caller is already
    /// attaching, this call waits on the same in-flight attempt rather
    /// than starting a second one.
    pub async fn attach(&self, session: &SessionId, tab: TabId) -> Result<(), PoolError> {
        let conn = self.conn_for(session, tab).await;
        let mut guard = conn.lock().await;
        if guard.attached {
            return Ok(());
        }
        self.transport.attach(tab).await?;
        guard.attached = true;
        tracing::debug!(session = %session, tab = %tab, "attached");
        Ok(())
    }

    /// Detach the debugger from `tab` for `session`. Tolerant of detaching
    /// an already-detached or never-attached connection.
    pub async fn detach(&self, session: &SessionId, tab: TabId) -> Result<(), PoolError> {
        let existing = {
            let conns = self.conns.lock().await;
            conns.get(&(session.clone(), tab)).cloned()
        };
        let Some(conn) = existing else {
            return Ok(());
        };
        let mut guard = conn.lock().await;
        if !guard.attached {
            return Ok(());
        }
        if let Err(e) = self.transport.detach(tab).await {
            tracing::warn!(session = %session, tab = %tab, error = %e, "detach failed");
        }
        guard.attached = false;
        Ok(())
    }

    /// Ensure attachment, then invoke a debugger method against `tab`. On a
    /// detach-during-call error this reattaches once and retries the call
    /// once before surfacing [`PoolError::Detached`].
    pub async fn execute(
        &self,
        session: &SessionId,
        tab: TabId,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, PoolError> {
        self.attach(session, tab).await?;

        match self.transport.call(tab, method, params.clone()).await {
            Ok(v) => Ok(v),
            Err(TransportError::DetachedDuringCall(_)) => {
                let conn = self.conn_for(session, tab).await;
                {
                    let mut guard = conn.lock().await;
                    guard.attached = false;
                }
                self.attach(session, tab).await?;
                self.transport
                    .call(tab, method, params)
                    .await
                    .map_err(|_| PoolError::Detached(tab))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Detach every connection belonging to `session`. Individual detach
    /// failures are logged and otherwise ignored — this call always
    /// succeeds from the caller's point of view.
    pub async fn detach_all(&self, session: &SessionId) {
        let keys: Vec<TabId> = {
            let conns = self.conns.lock().await;
            conns
                .keys()
                .filter(|(s, _)| s == session)
                .map(|(_, t)| *t)
                .collect()
        };
        for tab in keys {
            let _ = self.detach(session, tab).await;
        }
    }

    /// React to an out-of-band detach notification (e.g. the browser
    /// closed the debugger channel on its own). Marks every matching
    /// connection as detached without calling back into the transport.
    pub fn on_detach(&self, tab: TabId, reason: &str) {
        tracing::info!(tab = %tab, reason, "received external detach notification");
        if let Ok(mut conns) = self.conns.try_lock() {
            for (key, conn) in conns.iter_mut() {
                if key.1 == tab {
                    if let Ok(mut guard) = conn.try_lock() {
                        guard.attached = false;
                    }
                }
            }
        }
    }

    /// Whether `(session, tab)` is currently attached, per the pool's last
    /// confirmed state.
    pub async fn is_attached(&self, session: &SessionId, tab: TabId) -> bool {
        let conns = self.conns.lock().await;
        conns
            .get(&(session.clone(), tab))
            .map(|c| {
                // best-effort snapshot; avoids requiring an async context
                // at every call site that only wants a quick peek.
                c.try_lock().map(|g| g.attached).unwrap_or(true)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        attach_calls: AtomicUsize,
        fail_next_call: std::sync::atomic::AtomicBool,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                attach_calls: AtomicUsize::new(0),
                fail_next_call: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CdpTransport for MockTransport {
        async fn attach(&self, _tab: TabId) -> Result<(), TransportError> {
            self.attach_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn detach(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn call(&self, tab: TabId, method: &str, _params: Value) -> Result<Value, TransportError> {
            if self.fail_next_call.swap(false, Ordering::SeqCst) {
                return Err(TransportError::DetachedDuringCall(tab));
            }
            Ok(json!({ "method": method }))
        }
    }

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[tokio::test]
    async fn attach_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let pool = ConnectionPool::new(transport.clone());
        let session = sid("A");

        pool.attach(&session, TabId(1)).await.unwrap();
        pool.attach(&session, TabId(1)).await.unwrap();
        pool.attach(&session, TabId(1)).await.unwrap();

        assert_eq!(transport.attach_calls.load(Ordering::SeqCst), 1);
        assert!(pool.is_attached(&session, TabId(1)).await);
    }

    #[tokio::test]
    async fn concurrent_attach_coalesces() {
        let transport = Arc::new(MockTransport::new());
        let pool = Arc::new(ConnectionPool::new(transport.clone()));
        let session = sid("A");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                pool.attach(&session, TabId(7)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(transport.attach_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_reattaches_once_on_detach_during_call() {
        let transport = Arc::new(MockTransport::new());
        let pool = ConnectionPool::new(transport.clone());
        let session = sid("A");

        pool.attach(&session, TabId(1)).await.unwrap();
        transport.fail_next_call.store(true, Ordering::SeqCst);

        let result = pool
            .execute(&session, TabId(1), "Page.navigate", json!({}))
            .await;

        assert!(result.is_ok());
        assert_eq!(transport.attach_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn detach_all_clears_every_connection_for_session() {
        let transport = Arc::new(MockTransport::new());
        let pool = ConnectionPool::new(transport.clone());
        let session = sid("A");

        pool.attach(&session, TabId(1)).await.unwrap();
        pool.attach(&session, TabId(2)).await.unwrap();
        pool.detach_all(&session).await;

        assert!(!pool.is_attached(&session, TabId(1)).await);
        assert!(!pool.is_attached(&session, TabId(2)).await);
    }
}
