//! Wire protocol for browser-server communication.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hostbridge_core::{Mode, QueryReply, ScrollTarget, TerminalCommand, TerminalQuery, TextOrigin};
use serde::{Deserialize, Serialize};

/// Message from the browser to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keystrokes (base64 encoded).
    Input { data: String },
    /// Sign in to the host.
    Login {
        access_code: String,
        verify_code: String,
    },
    Logout,
    /// Open a fresh channel without signing in.
    Reconnect,
    /// Resize terminal.
    Resize { cols: u16, rows: u16 },
    /// Enter or leave output-only mode.
    ReportMode { active: bool },
    Clear,
    Reinitialize,
    /// Scroll to an element, or to the bottom when absent.
    ScrollTo {
        #[serde(default)]
        target: Option<String>,
    },
    DownloadTranscript,
    /// Answer to a [`ServerMessage::Query`].
    QueryReply { request_id: u64, reply: QueryReply },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Create an input message from raw bytes.
    #[must_use]
    pub fn input(data: &[u8]) -> Self {
        Self::Input {
            data: BASE64.encode(data),
        }
    }

    /// Decode input data from base64.
    #[must_use]
    pub fn decode_input(&self) -> Option<Vec<u8>> {
        if let Self::Input { data } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }
}

/// Message from the server to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session started.
    SessionStarted { session_id: String },
    /// Terminal output (base64 encoded).
    Output { data: String, origin: TextOrigin },
    Clear,
    Reinitialize,
    ScrollTo {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        target: Option<String>,
    },
    /// Offer a text file for download (base64 encoded).
    Download { file_name: String, data: String },
    ShowDialog { id: String },
    HideDialog { id: String },
    CopyToClipboard { text: String },
    /// Request a value from the widget.
    Query {
        request_id: u64,
        query: TerminalQuery,
    },
    ModeChanged { mode: Mode },
    LoginResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create an output message from text.
    #[must_use]
    pub fn output(text: &str, origin: TextOrigin) -> Self {
        Self::Output {
            data: BASE64.encode(text.as_bytes()),
            origin,
        }
    }

    /// Decode output data from base64.
    #[must_use]
    pub fn decode_output(&self) -> Option<Vec<u8>> {
        if let Self::Output { data, .. } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }
}

impl From<TerminalCommand> for ServerMessage {
    fn from(command: TerminalCommand) -> Self {
        match command {
            TerminalCommand::Write { text, origin } => Self::output(&text, origin),
            TerminalCommand::Clear => Self::Clear,
            TerminalCommand::Reinitialize => Self::Reinitialize,
            TerminalCommand::ScrollTo(ScrollTarget::Element(id)) => Self::ScrollTo { target: Some(id) },
            TerminalCommand::ScrollTo(ScrollTarget::Bottom) => Self::ScrollTo { target: None },
            TerminalCommand::DownloadTranscript {
                file_name,
                contents,
            } => Self::Download {
                file_name,
                data: BASE64.encode(contents.as_bytes()),
            },
            TerminalCommand::ShowDialog { id } => Self::ShowDialog { id },
            TerminalCommand::HideDialog { id } => Self::HideDialog { id },
            TerminalCommand::CopyToClipboard { text } => Self::CopyToClipboard { text },
        }
    }
}
