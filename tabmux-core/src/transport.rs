//! Collaborator traits the core consumes but does not implement.
//!
//! The core treats the browser debugger protocol and the underlying page
//! pool as opaque collaborators, the same way `Environment` in an agent
//! runtime treats its sandbox as an opaque collaborator: the trait names
//! the operation, not the mechanism, so a real Chrome DevTools Protocol
//! client, a mock for tests, and a future non-CDP backend can all satisfy
//! it.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::id::{GroupId, TabId};

/// Errors surfaced by a [`CdpTransport`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The debugger channel is not attached to the target tab.
    #[error("not attached to tab {0}")]
    NotAttached(TabId),

    /// The debugger channel was attached but then disconnected mid-call.
    #[error("detached during call to tab {0}")]
    DetachedDuringCall(TabId),

    /// The remote method returned a protocol-level error.
    #[error("cdp error calling {method} on tab {tab}: {message}")]
    Remote {
        /// The tab the call targeted.
        tab: TabId,
        /// The CDP method invoked.
        method: String,
        /// The error message returned by the browser.
        message: String,
    },

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The low-level debugger channel to one browser tab.
///
/// Implementations own the actual wire protocol (Chrome DevTools Protocol
/// over a websocket, typically). [`crate`] consumers never call this
/// directly; they go through `tabmux-pool`'s `ConnectionPool`, which adds
/// attach/detach bookkeeping and dedup on top.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Attach the debugger to `tab`. Must be idempotent: attaching to an
    /// already-attached tab is a no-op success.
    async fn attach(&self, tab: TabId) -> Result<(), TransportError>;

    /// Detach the debugger from `tab`. Must tolerate detaching an
    /// already-detached tab.
    async fn detach(&self, tab: TabId) -> Result<(), TransportError>;

    /// Invoke a CDP method against `tab` and return its raw JSON result.
    async fn call(&self, tab: TabId, method: &str, params: Value) -> Result<Value, TransportError>;
}

/// A single browser page/tab handle, as vended by [`BrowserBackend`].
#[derive(Debug, Clone)]
pub struct Page {
    /// The tab id this handle refers to.
    pub tab: TabId,
    /// The group the tab was created in, if any.
    pub group: Option<GroupId>,
}

/// The browser-side operations the tab-group and workflow layers need that
/// are not debugger calls: creating/closing tabs and groups, batching page
/// acquisition for bulk workflow init.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Create a new tab group, seeded with one anchor tab, and return both.
    async fn create_group(&self, title: Option<&str>) -> Result<(GroupId, Page), TransportError>;

    /// Create a new tab inside an existing group, optionally navigating it.
    async fn create_tab_in_group(
        &self,
        group: GroupId,
        url: Option<&str>,
    ) -> Result<Page, TransportError>;

    /// Acquire `n` fresh pages in one batch call, for bulk workflow init.
    async fn acquire_batch(&self, n: usize) -> Result<Vec<Page>, TransportError>;

    /// Close a single tab.
    async fn close_tab(&self, tab: TabId) -> Result<(), TransportError>;

    /// Close an entire tab group, including every tab inside it.
    async fn close_group(&self, group: GroupId) -> Result<(), TransportError>;
}
