//! Outbound seam to the browser terminal widget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Where a piece of displayed text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOrigin {
    /// Received from the host.
    Host,
    /// Synthesized locally (notices, masked prompts).
    Echo,
}

/// Scroll destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScrollTarget {
    /// A page element by id.
    Element(String),
    /// The end of the terminal output.
    Bottom,
}

/// One-way command to the widget. No acknowledgement is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    Write { text: String, origin: TextOrigin },
    Clear,
    Reinitialize,
    ScrollTo(ScrollTarget),
    DownloadTranscript { file_name: String, contents: String },
    ShowDialog { id: String },
    HideDialog { id: String },
    CopyToClipboard { text: String },
}

/// Request that needs an answer from the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalQuery {
    Clipboard,
    WindowGeometry,
}

/// Browser window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
}

/// Answer to a [`TerminalQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryReply {
    Clipboard { text: String },
    WindowGeometry(WindowGeometry),
}

/// Trait for terminal widget transports.
#[async_trait]
pub trait TerminalSink: Send + Sync {
    /// Fire-and-forget push.
    fn push(&self, command: TerminalCommand);

    /// Ask the widget for a value.
    async fn query(&self, query: TerminalQuery) -> Result<QueryReply, BridgeError>;
}
