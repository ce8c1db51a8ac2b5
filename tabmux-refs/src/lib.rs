//! # tabmux-refs — stable accessibility-tree reference ids
//!
//! Generates short, stable `ref_N` handles for DOM/accessibility nodes, so
//! a tool handler can hand an agent a reference rather than a raw backend
//! node id. Counters are scoped per `(session, tab)` and reset whenever the
//! tab navigates, since backend node ids themselves are not stable across
//! navigations.

#![deny(missing_docs)]

use std::collections::HashMap;

use tabmux_core::{SessionId, TabId};
use tokio::sync::Mutex;

/// One generated reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    /// The stable handle, e.g. `"ref_3"`.
    pub ref_id: String,
    /// The backend node id this handle resolves to.
    pub backend_node_id: u64,
    /// The accessibility role of the node, e.g. `"button"`.
    pub role: String,
    /// The accessible name of the node, if any.
    pub name: Option<String>,
    /// Millisecond timestamp this entry was generated at.
    pub created_at: u64,
}

#[derive(Default)]
struct TabRefs {
    next: u32,
    entries: HashMap<String, RefEntry>,
}

/// Per-session, per-tab generator and lookup table for reference ids.
#[derive(Default)]
pub struct RefIdRegistry {
    tabs: Mutex<HashMap<(SessionId, TabId), TabRefs>>,
}

impl RefIdRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next `ref_N` for `(session, tab)` and record what it
    /// resolves to.
    pub async fn generate(
        &self,
        session: &SessionId,
        tab: TabId,
        backend_node_id: u64,
        role: impl Into<String>,
        name: Option<String>,
        now_ms: u64,
    ) -> String {
        let mut tabs = self.tabs.lock().await;
        let entry_table = tabs.entry((session.clone(), tab)).or_default();
        entry_table.next += 1;
        let ref_id = format!("ref_{}", entry_table.next);
        entry_table.entries.insert(
            ref_id.clone(),
            RefEntry {
                ref_id: ref_id.clone(),
                backend_node_id,
                role: role.into(),
                name,
                created_at: now_ms,
            },
        );
        ref_id
    }

    /// Resolve a previously generated reference, if it is still live.
    pub async fn get(&self, session: &SessionId, tab: TabId, ref_id: &str) -> Option<RefEntry> {
        let tabs = self.tabs.lock().await;
        tabs.get(&(session.clone(), tab))
            .and_then(|t| t.entries.get(ref_id))
            .cloned()
    }

    /// Reset the counter and drop every reference for `(session, tab)`,
    /// called whenever the tab navigates.
    pub async fn clear_tab(&self, session: &SessionId, tab: TabId) {
        let mut tabs = self.tabs.lock().await;
        tabs.remove(&(session.clone(), tab));
    }

    /// Drop every reference belonging to every tab of `session`.
    pub async fn clear_session(&self, session: &SessionId) {
        let mut tabs = self.tabs.lock().await;
        tabs.retain(|(s, _), _| s != session);
    }
}
