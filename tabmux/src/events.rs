//! Out-of-band browser event handling.
//!
//! The core never polls the browser itself. Instead callers translate
//! `tabs.onRemoved`/`debugger.onDetach`-style notifications into
//! [`BrowserEvent`] values and feed them through an `mpsc::Receiver`;
//! [`drive_browser_events`] applies each one to the owning registries.

use std::sync::Arc;

use tabmux_core::{GroupId, TabId};
use tabmux_pool::ConnectionPool;
use tabmux_sessions::SessionRegistry;
use tabmux_tabs::TabGroupRegistry;
use tokio::sync::mpsc::Receiver;

/// A browser-originated lifecycle event the core did not initiate itself.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    /// The browser closed a tab outside of a `close_tab` call.
    TabRemoved(TabId),
    /// The browser closed a tab group outside of a `close_group` call.
    GroupRemoved(GroupId),
    /// The debugger detached from a tab on its own (crash, user action).
    DebuggerDetached {
        /// The tab the debugger detached from.
        tab: TabId,
        /// The browser-reported reason, if any.
        reason: String,
    },
}

/// Consume `events` until the sender is dropped, applying each to `tabs`,
/// `pool` and `sessions`. Intended to be spawned as a long-lived background
/// task fed by whatever owns the real browser connection.
pub async fn drive_browser_events(
    mut events: Receiver<BrowserEvent>,
    tabs: Arc<TabGroupRegistry>,
    pool: Arc<ConnectionPool>,
    sessions: Arc<SessionRegistry>,
) {
    while let Some(event) = events.recv().await {
        match event {
            BrowserEvent::TabRemoved(tab) => tabs.on_tab_removed(tab).await,
            BrowserEvent::GroupRemoved(group) => tabs.on_group_removed(group).await,
            BrowserEvent::DebuggerDetached { tab, reason } => {
                pool.on_detach(tab, &reason);
                sessions.note_cdp_detached(tab).await;
            }
        }
    }
}
