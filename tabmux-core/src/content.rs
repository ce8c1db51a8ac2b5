//! Universal content types carried in tool-call results.

use serde::{Deserialize, Serialize};

/// One block of a tool result's content array.
///
/// Tagged on `type`; unknown future modalities go through [`Content::Custom`]
/// until they stabilize into a named variant.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    /// Plain text block.
    #[serde(rename = "text")]
    Text {
        /// The text payload.
        text: String,
    },

    /// Inline image block.
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// The image's MIME type, e.g. `"image/png"`.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// A reference to an out-of-band resource (a screenshot saved to disk,
    /// a downloaded file) rather than inlined bytes.
    #[serde(rename = "resource")]
    Resource {
        /// URI identifying the resource.
        uri: String,
        /// The resource's MIME type, if known.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },

    /// Escape hatch for a future content modality.
    #[serde(rename = "custom")]
    Custom {
        /// Identifies the custom content kind.
        content_type: String,
        /// Arbitrary payload.
        data: serde_json::Value,
    },
}

impl Content {
    /// Build a text content block.
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text { text: s.into() }
    }

    /// Extract the block's text, if it is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// The result of invoking a tool handler.
///
/// `is_error: true` marks a tool-level failure: the call completed but the
/// outcome is a failure the caller should read from `content`. This is
/// distinct from a protocol-level RPC error, which never reaches this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolResult {
    /// The content blocks produced by the tool.
    pub content: Vec<Content>,
    /// Whether this result represents a tool-level failure.
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result carrying a single text block.
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(s)],
            is_error: false,
        }
    }

    /// A failed result carrying a single explanatory text block.
    pub fn error(s: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(s)],
            is_error: true,
        }
    }
}
