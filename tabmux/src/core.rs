//! The root facade value: every component wired behind `Arc`, no
//! process-wide singletons.

use std::sync::Arc;
use std::time::Duration;

use tabmux_core::{BrowserBackend, CdpTransport, CoreConfig};
use tabmux_pool::ConnectionPool;
use tabmux_sessions::SessionRegistry;
use tabmux_tabs::TabGroupRegistry;
use tokio::task::JoinHandle;

#[cfg(feature = "refs")]
use tabmux_refs::RefIdRegistry;
#[cfg(feature = "scratchpad")]
use tabmux_scratchpad::ScratchpadStore;
#[cfg(feature = "rpc")]
use tabmux_rpc::{RpcDispatcher, ToolRegistry};
#[cfg(feature = "workflow")]
use tabmux_workflow::{PagePool, SessionManager, WorkflowEngine};

/// The assembled core: session/tab/connection state plus whichever
/// optional components the enabled feature flags pulled in. Background
/// tasks (the idle reaper) are owned `JoinHandle`s, aborted on `Drop`.
pub struct Core {
    /// Runtime configuration this core was built with.
    pub config: CoreConfig,
    /// Tab-group ownership registry, shared with the session registry.
    pub tabs: Arc<TabGroupRegistry>,
    /// CDP connection pool, shared with the session registry.
    pub pool: Arc<ConnectionPool>,
    /// Session lifecycle registry — the entry point most callers use.
    pub sessions: Arc<SessionRegistry>,
    /// Per-tab accessibility reference ids.
    #[cfg(feature = "refs")]
    pub refs: Arc<RefIdRegistry>,
    /// Persisted worker/orchestration scratchpad store.
    #[cfg(feature = "scratchpad")]
    pub scratchpad: Arc<ScratchpadStore>,
    idle_reaper: JoinHandle<()>,
}

impl Core {
    /// Build a core over the given CDP transport and browser backend,
    /// spawning the idle-session reaper at the configured scan interval.
    pub fn new(backend: Arc<dyn BrowserBackend>, transport: Arc<dyn CdpTransport>, config: CoreConfig) -> Self {
        let tabs = Arc::new(TabGroupRegistry::new(backend));
        let pool = Arc::new(ConnectionPool::new(transport));
        let sessions = Arc::new(SessionRegistry::new(tabs.clone(), pool.clone()));

        let reap_sessions = sessions.clone();
        let scan_interval = config.session_idle_scan_ms.to_std();
        let reap_age = config.session_idle_reap_ms;
        let idle_reaper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                let reaped = reap_sessions.reap_idle(reap_age).await;
                if !reaped.is_empty() {
                    tracing::info!(count = reaped.len(), "idle reaper deleted stale sessions");
                }
            }
        });

        Self {
            #[cfg(feature = "refs")]
            refs: Arc::new(RefIdRegistry::new()),
            #[cfg(feature = "scratchpad")]
            scratchpad: Arc::new(ScratchpadStore::new(std::env::temp_dir().join("tabmux"))),
            config,
            tabs,
            pool,
            sessions,
            idle_reaper,
        }
    }

    /// Point the scratchpad store at `dir` instead of the default
    /// `$TMPDIR/tabmux`. Call this before building a workflow engine if the
    /// caller wants persisted worker/orchestration state somewhere durable.
    #[cfg(feature = "scratchpad")]
    pub fn with_scratchpad_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.scratchpad = Arc::new(ScratchpadStore::new(dir));
        self
    }

    /// Build a [`WorkflowEngine`] over this core's scratchpad store and the
    /// caller-supplied session-manager/page-pool collaborators (the
    /// workflow engine needs a way to materialize worker tabs, which is
    /// outside what `Core` alone can do — it's implemented by whatever
    /// bridges cookies and navigation for this browser backend).
    #[cfg(feature = "workflow")]
    pub fn build_workflow_engine(&self, sessions: Arc<dyn SessionManager>, pages: Arc<dyn PagePool>) -> WorkflowEngine {
        WorkflowEngine::new(self.scratchpad.clone(), sessions, pages, self.config.clone())
    }

    /// Build an [`RpcDispatcher`] over this core's session registry and the
    /// caller-assembled tool registry.
    #[cfg(feature = "rpc")]
    pub fn build_rpc_dispatcher(&self, tools: ToolRegistry) -> RpcDispatcher {
        RpcDispatcher::new(tools, self.sessions.clone(), &self.config)
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.idle_reaper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tabmux_core::{GroupId, Page, SessionId, TabId, TransportError};

    struct NoopTransport;
    #[async_trait]
    impl CdpTransport for NoopTransport {
        async fn attach(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }
        async fn detach(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }
        async fn call(&self, _tab: TabId, _method: &str, _params: serde_json::Value) -> Result<serde_json::Value, TransportError> {
            Ok(serde_json::json!({}))
        }
    }

    struct MockBackend {
        next_tab: AtomicU64,
        next_group: AtomicU64,
    }
    #[async_trait]
    impl BrowserBackend for MockBackend {
        async fn create_group(&self, _title: Option<&str>) -> Result<(GroupId, Page), TransportError> {
            let group = GroupId(self.next_group.fetch_add(1, Ordering::SeqCst));
            let tab = TabId(self.next_tab.fetch_add(1, Ordering::SeqCst));
            Ok((group, Page { tab, group: Some(group) }))
        }
        async fn create_tab_in_group(&self, group: GroupId, _url: Option<&str>) -> Result<Page, TransportError> {
            Ok(Page { tab: TabId(self.next_tab.fetch_add(1, Ordering::SeqCst)), group: Some(group) })
        }
        async fn acquire_batch(&self, n: usize) -> Result<Vec<Page>, TransportError> {
            Ok((0..n).map(|_| Page { tab: TabId(self.next_tab.fetch_add(1, Ordering::SeqCst)), group: None }).collect())
        }
        async fn close_tab(&self, _tab: TabId) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close_group(&self, _group: GroupId) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn core() -> Core {
        let backend = Arc::new(MockBackend { next_tab: AtomicU64::new(1), next_group: AtomicU64::new(1) });
        Core::new(backend, Arc::new(NoopTransport), CoreConfig::default())
    }

    #[tokio::test]
    async fn sessions_and_tabs_work_through_the_facade() {
        let core = core();
        let session = SessionId::from("A");
        core.sessions.get_or_create(&session).await;
        let tab = core.sessions.create_tab(&session, None).await.unwrap();
        assert!(core.tabs.validate_ownership(&session, tab).await);
    }

    #[cfg(feature = "scratchpad")]
    #[tokio::test]
    async fn with_scratchpad_dir_overrides_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let core = core().with_scratchpad_dir(dir.path());
        assert_eq!(core.scratchpad.orchestration_path(), dir.path().join("orchestration.md"));
    }
}
