//! Shell channel lifecycle and the single-writer send path.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use hostbridge_core::{
    BridgeConfig, BridgeError, ChannelControl, Credential, Result, ShellConnector, WipeGuard,
    config::{HostSettings, TerminalSettings},
};
use tokio::sync::mpsc;

use crate::decode::Utf8Stream;

struct OpenChannel {
    output: mpsc::Receiver<Vec<u8>>,
    writer: Mutex<Box<dyn Write + Send>>,
    control: Box<dyn ChannelControl>,
    decoder: Utf8Stream,
}

/// Owns the remote shell channel.
///
/// At most one channel is live: [`ConnectionManager::open`] releases any
/// previous channel before asking the connector for a new one. Writes go
/// through a single lock so two sends never interleave on the wire.
pub struct ConnectionManager {
    connector: Arc<dyn ShellConnector>,
    host: HostSettings,
    terminal: TerminalSettings,
    line_terminator: String,
    channel: Option<OpenChannel>,
}

impl ConnectionManager {
    /// Create a closed manager.
    #[must_use]
    pub fn new(connector: Arc<dyn ShellConnector>, config: &BridgeConfig) -> Self {
        Self {
            connector,
            host: config.host.clone(),
            terminal: config.terminal.clone(),
            line_terminator: config.protocol.line_terminator.clone(),
            channel: None,
        }
    }

    /// Establish the shell channel, closing any prior one first.
    ///
    /// # Errors
    /// Returns [`BridgeError::Connection`] if the host is unreachable.
    pub async fn open(&mut self) -> Result<()> {
        self.close();
        let channel = self.connector.open(&self.host, &self.terminal).await?;
        self.channel = Some(OpenChannel {
            output: channel.output,
            writer: Mutex::new(channel.writer),
            control: channel.control,
            decoder: Utf8Stream::default(),
        });
        tracing::info!(host = %self.host.address, port = self.host.port, "Shell channel open");
        Ok(())
    }

    /// Release the channel and connection. Safe on a closed manager.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.control.close();
            tracing::info!(host = %self.host.address, "Shell channel closed");
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    #[must_use]
    pub fn line_terminator(&self) -> &str {
        &self.line_terminator
    }

    /// Write `text` followed by the line terminator.
    ///
    /// # Errors
    /// Returns [`BridgeError::StaleSession`] if the channel is gone.
    pub fn send_raw(&self, text: &str) -> Result<()> {
        let line = format!("{text}{}", self.line_terminator);
        self.write_parts(&[line.as_bytes()])
    }

    /// Write keystrokes exactly as given.
    ///
    /// # Errors
    /// Returns [`BridgeError::StaleSession`] if the channel is gone.
    pub fn send_keys(&self, keys: &str) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.write_parts(&[keys.as_bytes()])
    }

    /// Write a credential followed by the line terminator.
    ///
    /// The credential is wiped before this returns, whatever the outcome.
    ///
    /// # Errors
    /// Returns [`BridgeError::StaleSession`] if the channel is gone.
    pub fn send_secure(&self, secret: &mut Credential) -> Result<()> {
        let guard = WipeGuard::new(secret);
        self.write_parts(&[guard.expose(), self.line_terminator.as_bytes()])
    }

    fn write_parts(&self, parts: &[&[u8]]) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(BridgeError::StaleSession)?;
        let mut writer = channel
            .writer
            .lock()
            .map_err(|_| BridgeError::Connection("writer lock poisoned".to_string()))?;
        for part in parts {
            writer
                .write_all(part)
                .map_err(|e| BridgeError::from_write(&e))?;
        }
        writer.flush().map_err(|e| BridgeError::from_write(&e))
    }

    /// Next decoded output chunk.
    ///
    /// Returns `None` when no channel is open or the host closed it.
    pub async fn next_chunk(&mut self) -> Option<String> {
        let channel = self.channel.as_mut()?;
        loop {
            let bytes = channel.output.recv().await?;
            let text = channel.decoder.decode(&bytes);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    /// Announce new terminal geometry; remembered for later opens.
    ///
    /// # Errors
    /// Returns error if the open channel rejects the resize.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.terminal.cols = cols;
        self.terminal.rows = rows;
        match self.channel.as_mut() {
            Some(channel) => channel
                .control
                .resize(cols, rows)
                .map_err(|e| BridgeError::Connection(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
