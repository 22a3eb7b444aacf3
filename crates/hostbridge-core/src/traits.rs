//! Seam between the session and whatever carries the remote shell.

use std::io::Write;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    BridgeError,
    config::{HostSettings, TerminalSettings},
};

/// Control side of an open channel.
pub trait ChannelControl: Send {
    /// Announce new terminal geometry.
    ///
    /// # Errors
    /// Returns error if the channel rejects the resize.
    fn resize(&mut self, cols: u16, rows: u16) -> std::io::Result<()>;

    /// Release the channel and the connection under it. Idempotent.
    fn close(&mut self);
}

/// An open interactive shell on the host.
pub struct ShellChannel {
    /// Raw output chunks in arrival order; closes with the channel.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Keystroke sink.
    pub writer: Box<dyn Write + Send>,
    pub control: Box<dyn ChannelControl>,
}

impl std::fmt::Debug for ShellChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellChannel").finish_non_exhaustive()
    }
}

/// Trait for shell channel backends.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Open a shell channel with the given terminal geometry.
    ///
    /// # Errors
    /// Returns [`BridgeError::Connection`] if the host is unreachable.
    async fn open(
        &self,
        host: &HostSettings,
        terminal: &TerminalSettings,
    ) -> Result<ShellChannel, BridgeError>;
}
