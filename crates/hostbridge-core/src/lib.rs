//! Core abstractions for bridging a browser terminal to a legacy host.
//!
//! This crate provides the fundamental building blocks:
//! - `HistoryBuffer` - Bounded, order-preserving store of received text
//! - `Credential` - Access/verify code buffer that wipes itself after use
//! - `Sentinel` - Reserved delimiter faking response framing
//! - `BridgeConfig` - Externalized host, terminal and protocol settings
//! - `ShellConnector` and `TerminalSink` traits

pub mod config;
pub mod error;
pub mod framing;
pub mod history;
pub mod mode;
pub mod secret;
pub mod terminal;
pub mod traits;

pub use config::BridgeConfig;
pub use error::{AuthFailure, BridgeError, ConfigError, ProtocolFailure, Result};
pub use framing::Sentinel;
pub use history::HistoryBuffer;
pub use mode::Mode;
pub use secret::{Credential, WipeGuard};
pub use terminal::{
    QueryReply, ScrollTarget, TerminalCommand, TerminalQuery, TerminalSink, TextOrigin,
    WindowGeometry,
};
pub use traits::{ChannelControl, ShellChannel, ShellConnector};
