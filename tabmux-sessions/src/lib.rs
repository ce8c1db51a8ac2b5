//! # tabmux-sessions — session lifecycle registry
//!
//! Owns session identity, activity tracking and the idle reaper, and fuses
//! [`tabmux_tabs::TabGroupRegistry`], [`tabmux_pool::ConnectionPool`] and
//! [`tabmux_queue::QueueManager`] into the single canonical path
//! ([`SessionRegistry::execute_cdp`]) every tool call should use to reach
//! the browser: validate ownership, touch activity, serialize through the
//! session's queue, execute against the pool.

#![deny(missing_docs)]

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tabmux_core::{GroupColor, GroupId, MonoMs, SessionId, TabId};
use tabmux_pool::{ConnectionPool, PoolError};
use tabmux_queue::{QueueError, QueueManager};
use tabmux_tabs::{TabError, TabGroupRegistry};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by the session registry.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session exists with the given id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The tab is not owned by the session performing the operation.
    #[error(transparent)]
    Tab(#[from] TabError),

    /// The connection pool reported an error.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The request queue rejected the item (the session was deleted
    /// concurrently).
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A tracked agent session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Stable session identifier.
    pub id: SessionId,
    /// The tab group backing this session, once materialized.
    pub tab_group_id: Option<GroupId>,
    /// Display name.
    pub name: String,
    /// Display color, assigned at tab-group creation time.
    pub color: Option<GroupColor>,
    /// When the session was created.
    pub created_at: MonoMs,
    /// Last time any operation touched this session.
    pub last_activity_at: MonoMs,
}

/// A lifecycle event fanned out to every registered listener.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// A session was created.
    Created {
        /// The session that was created.
        session: SessionId,
    },
    /// A session was deleted (explicitly or by the idle reaper).
    Deleted {
        /// The session that was deleted.
        session: SessionId,
    },
    /// A tab was added to a session's group.
    TabAdded {
        /// The owning session.
        session: SessionId,
        /// The tab that was added.
        tab: TabId,
    },
    /// A tab was removed from a session's group.
    TabRemoved {
        /// The owning session.
        session: SessionId,
        /// The tab that was removed.
        tab: TabId,
    },
    /// The debugger attached to a tab.
    CdpAttached {
        /// The owning session.
        session: SessionId,
        /// The tab the debugger attached to.
        tab: TabId,
    },
    /// The debugger detached from a tab.
    CdpDetached {
        /// The owning session.
        session: SessionId,
        /// The tab the debugger detached from.
        tab: TabId,
    },
}

/// Supplies the monotonic-ish millisecond clock sessions stamp their
/// activity with. Abstracted behind a trait purely so tests can drive time
/// deterministically; production code uses [`SystemClock`].
pub trait Clock: Send + Sync {
    /// The current time, in milliseconds.
    fn now_ms(&self) -> MonoMs;
}

/// A [`Clock`] backed by the system wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> MonoMs {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        MonoMs::from_millis(d.as_millis() as u64)
    }
}

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Options for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOpts {
    /// Caller-supplied id. If `None`, the registry generates one.
    pub id: Option<String>,
    /// Display name; defaults to the session id.
    pub name: Option<String>,
}

/// Registry of every live session: identity, activity, and the fused
/// queue/pool/tab-ownership path.
pub struct SessionRegistry {
    tabs: Arc<TabGroupRegistry>,
    pool: Arc<ConnectionPool>,
    queue: QueueManager,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    listeners: StdMutex<Vec<Listener>>,
    next_anon_id: std::sync::atomic::AtomicU64,
}

impl SessionRegistry {
    /// Build a registry over the given collaborators, using the system
    /// wall clock.
    pub fn new(tabs: Arc<TabGroupRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self::with_clock(tabs, pool, Arc::new(SystemClock))
    }

    /// Build a registry with an injected clock (for deterministic tests).
    pub fn with_clock(
        tabs: Arc<TabGroupRegistry>,
        pool: Arc<ConnectionPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tabs,
            pool,
            queue: QueueManager::new(),
            clock,
            sessions: Mutex::new(HashMap::new()),
            listeners: StdMutex::new(Vec::new()),
            next_anon_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Register a listener for every lifecycle event. A panicking listener
    /// is caught and logged; it never aborts the triggering operation or
    /// any other listener.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }

    fn emit(&self, event: LifecycleEvent) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if result.is_err() {
                tracing::error!("session lifecycle listener panicked");
            }
        }
    }

    /// Create a new session. If `opts.id` collides with an existing
    /// session, that existing session is returned unchanged (matching
    /// [`SessionRegistry::get_or_create`]'s semantics).
    pub async fn create(&self, opts: CreateSessionOpts) -> Session {
        let id = opts.id.unwrap_or_else(|| {
            let n = self.next_anon_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("session-{n}")
        });
        self.get_or_create(&SessionId::new(id.clone())).await
    }

    /// Return the session with id `session`, creating it if it does not
    /// yet exist.
    pub async fn get_or_create(&self, session: &SessionId) -> Session {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(session) {
            return existing.clone();
        }
        let now = self.clock.now_ms();
        let created = Session {
            id: session.clone(),
            tab_group_id: None,
            name: session.as_str().to_owned(),
            color: None,
            created_at: now,
            last_activity_at: now,
        };
        sessions.insert(session.clone(), created.clone());
        drop(sessions);
        self.emit(LifecycleEvent::Created {
            session: session.clone(),
        });
        created
    }

    /// Fetch a snapshot of `session`, if it exists.
    pub async fn get(&self, session: &SessionId) -> Option<Session> {
        self.sessions.lock().await.get(session).cloned()
    }

    /// Snapshot every currently tracked session.
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Idempotently materialize the session's backing tab group.
    pub async fn ensure_tab_group(&self, session: &SessionId) -> Result<GroupId, SessionError> {
        if let Some(existing) = self.tabs.group_for_session(session).await {
            return Ok(existing);
        }
        let created = self.tabs.create_group(session, None).await?;
        let mut sessions = self.sessions.lock().await;
        if let Some(s) = sessions.get_mut(session) {
            s.tab_group_id = Some(created.group_id);
            s.color = Some(created.color);
        }
        drop(sessions);
        self.emit(LifecycleEvent::TabAdded {
            session: session.clone(),
            tab: created.anchor_tab,
        });
        Ok(created.group_id)
    }

    /// Create a new tab inside `session`'s group, materializing the group
    /// first if needed.
    pub async fn create_tab(
        &self,
        session: &SessionId,
        url: Option<&str>,
    ) -> Result<TabId, SessionError> {
        self.ensure_tab_group(session).await?;
        let page = self.tabs.create_tab_in_group(session, url).await?;
        self.touch(session).await;
        self.emit(LifecycleEvent::TabAdded {
            session: session.clone(),
            tab: page.tab,
        });
        Ok(page.tab)
    }

    /// Remove `tab` from `session`'s group bookkeeping.
    pub async fn remove_tab(&self, session: &SessionId, tab: TabId) {
        self.tabs.remove_from_group(tab).await;
        self.emit(LifecycleEvent::TabRemoved {
            session: session.clone(),
            tab,
        });
    }

    async fn touch(&self, session: &SessionId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(s) = sessions.get_mut(session) {
            s.last_activity_at = self.clock.now_ms();
        }
    }

    /// The canonical fused path for a CDP call: validate ownership, touch
    /// activity, serialize through the per-session queue, then execute
    /// against the connection pool.
    pub async fn execute_cdp(
        &self,
        session: &SessionId,
        tab: TabId,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SessionError> {
        if !self.tabs.validate_ownership(session, tab).await {
            return Err(SessionError::Tab(TabError::NotOwned {
                tab,
                session: session.clone(),
            }));
        }
        self.touch(session).await;

        let was_attached = self.pool.is_attached(session, tab).await;
        let pool = self.pool.clone();
        let method = method.to_owned();
        let session_for_work = session.clone();
        let result = self
            .queue
            .enqueue(session, move || async move {
                pool.execute(&session_for_work, tab, &method, params).await
            })
            .await?;
        let result = result?;

        if !was_attached && self.pool.is_attached(session, tab).await {
            self.emit(LifecycleEvent::CdpAttached {
                session: session.clone(),
                tab,
            });
        }
        Ok(result)
    }

    /// Record an out-of-band debugger detach for `tab`, firing
    /// [`LifecycleEvent::CdpDetached`] for whichever session currently
    /// owns it. A no-op if the tab is unowned.
    pub async fn note_cdp_detached(&self, tab: TabId) {
        if let Some(session) = self.tabs.session_for_tab(tab).await {
            self.emit(LifecycleEvent::CdpDetached { session, tab });
        }
    }

    /// Delete `session`: detach every connection, close its tab group,
    /// drop its request queue, and remove it from the registry.
    pub async fn delete(&self, session: &SessionId) {
        self.pool.detach_all(session).await;
        let _ = self.tabs.delete_group(session).await;
        self.queue.delete_queue(session);
        self.sessions.lock().await.remove(session);
        self.emit(LifecycleEvent::Deleted {
            session: session.clone(),
        });
    }

    /// Delete every session whose last activity is older than `max_age`.
    /// Returns the ids of the sessions that were reaped.
    pub async fn reap_idle(&self, max_age: tabmux_core::DurationMs) -> Vec<SessionId> {
        let now = self.clock.now_ms();
        let stale: Vec<SessionId> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .filter(|s| s.last_activity_at.elapsed_since(now) > max_age)
                .map(|s| s.id.clone())
                .collect()
        };
        for id in &stale {
            self.delete(id).await;
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tabmux_core::{BrowserBackend, CdpTransport, Page, TransportError};

    struct FakeClock(AtomicU64);
    impl Clock for FakeClock {
        fn now_ms(&self) -> MonoMs {
            MonoMs::from_millis(self.0.load(Ordering::SeqCst))
        }
    }

    struct NoopTransport;
    #[async_trait]
    impl CdpTransport for NoopTransport {
        async fn attach(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }
        async fn detach(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }
        async fn call(&self, _tab: TabId, method: &str, _params: serde_json::Value) -> Result<serde_json::Value, TransportError> {
            Ok(serde_json::json!({ "method": method }))
        }
    }

    struct MockBackend {
        next_tab: AtomicU64,
        next_group: AtomicU64,
    }
    impl MockBackend {
        fn new() -> Self {
            Self { next_tab: AtomicU64::new(1), next_group: AtomicU64::new(1) }
        }
        fn alloc_tab(&self) -> TabId {
            TabId(self.next_tab.fetch_add(1, Ordering::SeqCst))
        }
    }
    #[async_trait]
    impl BrowserBackend for MockBackend {
        async fn create_group(&self, _title: Option<&str>) -> Result<(GroupId, Page), TransportError> {
            let group = GroupId(self.next_group.fetch_add(1, Ordering::SeqCst));
            let tab = self.alloc_tab();
            Ok((group, Page { tab, group: Some(group) }))
        }
        async fn create_tab_in_group(&self, group: GroupId, _url: Option<&str>) -> Result<Page, TransportError> {
            Ok(Page { tab: self.alloc_tab(), group: Some(group) })
        }
        async fn acquire_batch(&self, n: usize) -> Result<Vec<Page>, TransportError> {
            Ok((0..n).map(|_| Page { tab: self.alloc_tab(), group: None }).collect())
        }
        async fn close_tab(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close_group(&self, _group: GroupId) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn registry_with_clock(clock: Arc<dyn Clock>) -> SessionRegistry {
        let tabs = Arc::new(TabGroupRegistry::new(Arc::new(MockBackend::new())));
        let pool = Arc::new(ConnectionPool::new(Arc::new(NoopTransport)));
        SessionRegistry::with_clock(tabs, pool, clock)
    }

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[tokio::test]
    async fn first_tab_allocated_to_each_session_is_exclusive() {
        let registry = registry_with_clock(Arc::new(FakeClock(AtomicU64::new(0))));
        registry.get_or_create(&sid("A")).await;
        registry.get_or_create(&sid("B")).await;

        let group_a = registry.ensure_tab_group(&sid("A")).await.unwrap();
        let group_b = registry.ensure_tab_group(&sid("B")).await.unwrap();
        assert_ne!(group_a, group_b);

        let tab_a = registry.create_tab(&sid("A"), None).await.unwrap();
        let tab_b = registry.create_tab(&sid("B"), None).await.unwrap();

        assert!(registry.execute_cdp(&sid("A"), tab_a, "Page.ping", serde_json::json!({})).await.is_ok());
        assert!(registry.execute_cdp(&sid("A"), tab_b, "Page.ping", serde_json::json!({})).await.is_err());
        assert!(registry.execute_cdp(&sid("B"), tab_b, "Page.ping", serde_json::json!({})).await.is_ok());
        assert!(registry.execute_cdp(&sid("B"), tab_a, "Page.ping", serde_json::json!({})).await.is_err());
    }

    #[tokio::test]
    async fn reap_idle_deletes_only_stale_sessions() {
        let clock = Arc::new(FakeClock(AtomicU64::new(0)));
        let registry = registry_with_clock(clock.clone());

        registry.get_or_create(&sid("old")).await;
        clock.0.store(10_000, Ordering::SeqCst);
        registry.get_or_create(&sid("new")).await;

        let reaped = registry.reap_idle(tabmux_core::DurationMs::from_millis(5_000)).await;
        assert_eq!(reaped, vec![sid("old")]);
        assert!(registry.get(&sid("old")).await.is_none());
        assert!(registry.get(&sid("new")).await.is_some());
    }

    #[tokio::test]
    async fn delete_detaches_and_drops_queue() {
        let registry = registry_with_clock(Arc::new(FakeClock(AtomicU64::new(0))));
        let session = sid("A");
        registry.get_or_create(&session).await;
        let tab = registry.create_tab(&session, None).await.unwrap();
        registry.execute_cdp(&session, tab, "Page.ping", serde_json::json!({})).await.unwrap();

        registry.delete(&session).await;
        assert!(registry.get(&session).await.is_none());
    }

    #[tokio::test]
    async fn listener_panic_does_not_abort_other_listeners_or_the_caller() {
        let registry = registry_with_clock(Arc::new(FakeClock(AtomicU64::new(0))));
        let seen = Arc::new(StdMutex::new(false));
        let seen2 = seen.clone();

        registry.add_listener(|_event| panic!("boom"));
        registry.add_listener(move |_event| {
            *seen2.lock().unwrap() = true;
        });

        registry.get_or_create(&sid("A")).await;
        assert!(*seen.lock().unwrap());
    }

    #[tokio::test]
    async fn execute_cdp_fires_cdp_attached_once_on_first_call_only() {
        let registry = registry_with_clock(Arc::new(FakeClock(AtomicU64::new(0))));
        let session = sid("A");
        registry.get_or_create(&session).await;
        let tab = registry.create_tab(&session, None).await.unwrap();

        let attached_count = Arc::new(StdMutex::new(0usize));
        let counted = attached_count.clone();
        registry.add_listener(move |event| {
            if matches!(event, LifecycleEvent::CdpAttached { .. }) {
                *counted.lock().unwrap() += 1;
            }
        });

        registry.execute_cdp(&session, tab, "Page.ping", serde_json::json!({})).await.unwrap();
        registry.execute_cdp(&session, tab, "Page.ping", serde_json::json!({})).await.unwrap();

        assert_eq!(*attached_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn note_cdp_detached_fires_for_the_owning_session_only() {
        let registry = registry_with_clock(Arc::new(FakeClock(AtomicU64::new(0))));
        let session = sid("A");
        registry.get_or_create(&session).await;
        let tab = registry.create_tab(&session, None).await.unwrap();

        let seen = Arc::new(StdMutex::new(None));
        let seen2 = seen.clone();
        registry.add_listener(move |event| {
            if let LifecycleEvent::CdpDetached { session, tab } = event {
                *seen2.lock().unwrap() = Some((session.clone(), *tab));
            }
        });

        registry.note_cdp_detached(TabId(999_999)).await;
        assert!(seen.lock().unwrap().is_none());

        registry.note_cdp_detached(tab).await;
        assert_eq!(*seen.lock().unwrap(), Some((session, tab)));
    }
}
