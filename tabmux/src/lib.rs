//! # tabmux — browser-automation multi-session orchestration core
//!
//! A single root [`Core`] value wires every component together behind
//! `Arc`, mirroring the teacher's avoidance of global statics: there is no
//! process-wide singleton getter anywhere in this crate, only a value
//! constructed once and threaded explicitly to request handlers.
//!
//! Feature flags gate each component the way `neuron`'s facade gates its
//! operators/orchestrators/providers — enable just `sessions` for
//! programmatic tab-group management, or `full` for every component
//! including the RPC dispatcher and workflow engine.

#![deny(missing_docs)]

#[cfg(feature = "core")]
pub use tabmux_core;
#[cfg(feature = "refs")]
pub use tabmux_refs;
#[cfg(feature = "rpc")]
pub use tabmux_rpc;
#[cfg(feature = "scratchpad")]
pub use tabmux_scratchpad;
#[cfg(feature = "sessions")]
pub use tabmux_sessions;
#[cfg(feature = "workflow")]
pub use tabmux_workflow;

#[cfg(feature = "sessions")]
mod core;
#[cfg(feature = "sessions")]
mod events;

#[cfg(feature = "sessions")]
pub use core::Core;
#[cfg(feature = "sessions")]
pub use events::{drive_browser_events, BrowserEvent};

/// Happy-path imports for assembling a [`Core`].
pub mod prelude {
    #[cfg(feature = "core")]
    pub use tabmux_core::{
        BrowserBackend, CdpTransport, Content, CoreConfig, GroupId, OrchestrationId, Page, RefId,
        SessionId, TabId, ToolResult, TransportError, WorkerId,
    };

    #[cfg(feature = "sessions")]
    pub use crate::{BrowserEvent, Core};

    #[cfg(feature = "rpc")]
    pub use tabmux_rpc::{RpcDispatcher, RpcError, RpcRequest, RpcResponse, ToolHandler, ToolRegistry};

    #[cfg(feature = "workflow")]
    pub use tabmux_workflow::{PagePool, SessionManager, WorkflowDef, WorkflowEngine, WorkflowError};
}
