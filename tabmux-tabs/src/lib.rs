//! # tabmux-tabs — session/tab-group/tab ownership registry
//!
//! Tracks the bidirectional mapping between sessions, the browser tab
//! groups that visually isolate them, and the individual tabs inside each
//! group. [`TabGroupRegistry::validate_ownership`] is the single source of
//! truth every session-scoped operation must consult before touching a
//! tab.

#![deny(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tabmux_core::{color_for_index, BrowserBackend, GroupColor, GroupId, Page, SessionId, TabId, TransportError};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by the tab-group registry.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TabError {
    /// The session already owns a tab group; `create_group` is not
    /// idempotent by design (callers should check [`TabGroupRegistry::group_for_session`] first).
    #[error("session {0} already has a tab group")]
    GroupAlreadyExists(SessionId),

    /// The session has no tab group yet; create one first.
    #[error("session {0} has no tab group")]
    NoGroupForSession(SessionId),

    /// The tab is not owned by the given session.
    #[error("tab {tab} is not owned by session {session}")]
    NotOwned {
        /// The tab that was checked.
        tab: TabId,
        /// The session that does not own it.
        session: SessionId,
    },

    /// The underlying browser backend failed.
    #[error(transparent)]
    Backend(#[from] TransportError),
}

/// The tab group created for a session, along with its anchor tab and the
/// display color assigned to it.
#[derive(Debug, Clone)]
pub struct CreatedGroup {
    /// The newly allocated group id.
    pub group_id: GroupId,
    /// The anchor tab the backend seeded the group with.
    pub anchor_tab: TabId,
    /// The display color assigned, rotating through the 9-entry ring.
    pub color: GroupColor,
}

#[derive(Default)]
struct Inner {
    session_to_group: HashMap<SessionId, GroupId>,
    group_to_session: HashMap<GroupId, SessionId>,
    tab_to_session: HashMap<TabId, SessionId>,
    group_to_tabs: HashMap<GroupId, HashSet<TabId>>,
    next_color_index: usize,
}

/// Session <-> tab-group <-> tab ownership mapping.
pub struct TabGroupRegistry {
    backend: Arc<dyn BrowserBackend>,
    inner: Mutex<Inner>,
}

impl TabGroupRegistry {
    /// Build a registry backed by `backend`.
    pub fn new(backend: Arc<dyn BrowserBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create a new tab group for `session`, seeded with one anchor tab.
    pub async fn create_group(
        &self,
        session: &SessionId,
        title: Option<&str>,
    ) -> Result<CreatedGroup, TabError> {
        {
            let inner = self.inner.lock().await;
            if inner.session_to_group.contains_key(session) {
                return Err(TabError::GroupAlreadyExists(session.clone()));
            }
        }

        let (group_id, anchor) = self.backend.create_group(title).await?;

        let mut inner = self.inner.lock().await;
        let color = color_for_index(inner.next_color_index);
        inner.next_color_index += 1;
        inner.session_to_group.insert(session.clone(), group_id);
        inner.group_to_session.insert(group_id, session.clone());
        inner.tab_to_session.insert(anchor.tab, session.clone());
        inner
            .group_to_tabs
            .entry(group_id)
            .or_default()
            .insert(anchor.tab);

        tracing::info!(session = %session, group = %group_id, "tab group created");

        Ok(CreatedGroup {
            group_id,
            anchor_tab: anchor.tab,
            color,
        })
    }

    /// Create a new tab inside `session`'s group, optionally navigating it.
    pub async fn create_tab_in_group(
        &self,
        session: &SessionId,
        url: Option<&str>,
    ) -> Result<Page, TabError> {
        let group_id = self
            .group_for_session(session)
            .await
            .ok_or_else(|| TabError::NoGroupForSession(session.clone()))?;

        let page = self.backend.create_tab_in_group(group_id, url).await?;

        let mut inner = self.inner.lock().await;
        inner.tab_to_session.insert(page.tab, session.clone());
        inner.group_to_tabs.entry(group_id).or_default().insert(page.tab);

        Ok(page)
    }

    /// Record that `tab` (already created by some other path) belongs to
    /// `session`'s group.
    pub async fn add_tab(&self, tab: TabId, session: &SessionId) -> Result<(), TabError> {
        let group_id = self
            .group_for_session(session)
            .await
            .ok_or_else(|| TabError::NoGroupForSession(session.clone()))?;

        let mut inner = self.inner.lock().await;
        inner.tab_to_session.insert(tab, session.clone());
        inner.group_to_tabs.entry(group_id).or_default().insert(tab);
        Ok(())
    }

    /// Remove `tab` from whatever group currently owns it, without closing
    /// it in the browser.
    pub async fn remove_from_group(&self, tab: TabId) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.tab_to_session.remove(&tab) {
            if let Some(group) = inner.session_to_group.get(&session).copied() {
                if let Some(tabs) = inner.group_to_tabs.get_mut(&group) {
                    tabs.remove(&tab);
                }
            }
        }
    }

    /// Close every tab in `session`'s group and drop all mappings for it.
    pub async fn delete_group(&self, session: &SessionId) -> Result<(), TabError> {
        let group_id = {
            let inner = self.inner.lock().await;
            inner.session_to_group.get(session).copied()
        };
        let Some(group_id) = group_id else {
            return Ok(());
        };

        if let Err(e) = self.backend.close_group(group_id).await {
            tracing::warn!(session = %session, group = %group_id, error = %e, "close_group failed");
        }

        let mut inner = self.inner.lock().await;
        inner.session_to_group.remove(session);
        inner.group_to_session.remove(&group_id);
        if let Some(tabs) = inner.group_to_tabs.remove(&group_id) {
            for tab in tabs {
                inner.tab_to_session.remove(&tab);
            }
        }
        Ok(())
    }

    /// `true` iff `tab` is currently owned by `session`.
    pub async fn validate_ownership(&self, session: &SessionId, tab: TabId) -> bool {
        let inner = self.inner.lock().await;
        inner.tab_to_session.get(&tab) == Some(session)
    }

    /// The tab group id belonging to `session`, if any.
    pub async fn group_for_session(&self, session: &SessionId) -> Option<GroupId> {
        let inner = self.inner.lock().await;
        inner.session_to_group.get(session).copied()
    }

    /// The session that currently owns `tab`, if any.
    pub async fn session_for_tab(&self, tab: TabId) -> Option<SessionId> {
        let inner = self.inner.lock().await;
        inner.tab_to_session.get(&tab).cloned()
    }

    /// Every tab currently owned by `session`.
    pub async fn tabs_for_session(&self, session: &SessionId) -> Vec<TabId> {
        let inner = self.inner.lock().await;
        match inner.session_to_group.get(session) {
            Some(group) => inner
                .group_to_tabs
                .get(group)
                .map(|tabs| tabs.iter().copied().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// React to the browser reporting `tab` was closed out of band.
    pub async fn on_tab_removed(&self, tab: TabId) {
        self.remove_from_group(tab).await;
    }

    /// React to the browser reporting `group` was closed out of band.
    pub async fn on_group_removed(&self, group: GroupId) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.group_to_session.remove(&group) {
            inner.session_to_group.remove(&session);
        }
        if let Some(tabs) = inner.group_to_tabs.remove(&group) {
            for tab in tabs {
                inner.tab_to_session.remove(&tab);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MockBackend {
        next_tab: AtomicU64,
        next_group: AtomicU64,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                next_tab: AtomicU64::new(1),
                next_group: AtomicU64::new(1),
            }
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
            let tab = self.alloc_tab();
            Ok(Page { tab, group: Some(group) })
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

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[tokio::test]
    async fn ownership_is_exclusive_per_tab() {
        let registry = TabGroupRegistry::new(Arc::new(MockBackend::new()));

        let a = registry.create_group(&sid("A"), None).await.unwrap();
        let b = registry.create_group(&sid("B"), None).await.unwrap();

        assert!(registry.validate_ownership(&sid("A"), a.anchor_tab).await);
        assert!(!registry.validate_ownership(&sid("A"), b.anchor_tab).await);
        assert!(registry.validate_ownership(&sid("B"), b.anchor_tab).await);
        assert!(!registry.validate_ownership(&sid("B"), a.anchor_tab).await);
    }

    #[tokio::test]
    async fn colors_rotate_across_sessions() {
        let registry = TabGroupRegistry::new(Arc::new(MockBackend::new()));
        let a = registry.create_group(&sid("A"), None).await.unwrap();
        let b = registry.create_group(&sid("B"), None).await.unwrap();
        assert_eq!(a.color, GroupColor::Grey);
        assert_eq!(b.color, GroupColor::Blue);
    }

    #[tokio::test]
    async fn delete_group_cascades_to_every_tab() {
        let registry = TabGroupRegistry::new(Arc::new(MockBackend::new()));
        let session = sid("A");
        let created = registry.create_group(&session, None).await.unwrap();
        let second = registry.create_tab_in_group(&session, None).await.unwrap();

        registry.delete_group(&session).await.unwrap();

        assert!(!registry.validate_ownership(&session, created.anchor_tab).await);
        assert!(!registry.validate_ownership(&session, second.tab).await);
        assert_eq!(registry.group_for_session(&session).await, None);
    }

    #[tokio::test]
    async fn create_group_twice_for_same_session_fails() {
        let registry = TabGroupRegistry::new(Arc::new(MockBackend::new()));
        let session = sid("A");
        registry.create_group(&session, None).await.unwrap();
        let err = registry.create_group(&session, None).await.unwrap_err();
        assert!(matches!(err, TabError::GroupAlreadyExists(_)));
    }
}
