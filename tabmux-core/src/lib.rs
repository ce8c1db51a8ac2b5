//! # tabmux-core — shared types for the tabmux browser-automation core
//!
//! This crate holds the vocabulary every other `tabmux-*` crate builds on:
//! typed ids, the millisecond-stable wire types, the universal tool-result
//! content shape, the runtime configuration knobs, and the two collaborator
//! traits ([`CdpTransport`], [`BrowserBackend`]) the core depends on but
//! does not implement.
//!
//! ## Design principle
//!
//! Collaborator traits are operation-defined, not mechanism-defined.
//! [`CdpTransport::call`] means "invoke this debugger method against this
//! tab" — not "send this exact websocket frame." This is what keeps a real
//! Chrome DevTools Protocol client and an in-memory test double
//! interchangeable.
//!
//! ## Dependency notes
//!
//! This crate depends on `serde_json::Value` for the parts of the wire
//! format that are genuinely schema-free (tool arguments, CDP params/
//! results, custom content payloads). Everything else is a concrete,
//! typed struct or enum.

#![deny(missing_docs)]

pub mod config;
pub mod content;
pub mod duration;
pub mod id;
pub mod transport;

pub use config::{color_for_index, CoreConfig, GroupColor, GROUP_COLORS};
pub use content::{Content, ToolResult};
pub use duration::{DurationMs, MonoMs};
pub use id::{GroupId, OrchestrationId, RefId, SessionId, TabId, WorkerId};
pub use transport::{BrowserBackend, CdpTransport, Page, TransportError};
