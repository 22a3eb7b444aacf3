//! Session actor.
//!
//! All mutable session state lives in one task. Callers talk to it
//! through a cloneable [`SessionHandle`]; commands are processed one at a
//! time in arrival order, interleaved with host output.

use std::sync::Arc;

use hostbridge_core::{
    BridgeConfig, BridgeError, Credential, HistoryBuffer, Mode, Result, Sentinel, ShellConnector,
    TerminalSink,
};
use hostbridge_shell::ConnectionManager;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    bridge::TerminalBridge,
    login::LoginHandshake,
    mode::{ModeController, Route},
};

const COMMAND_QUEUE: usize = 1024;

enum Command {
    Login {
        access: Credential,
        verify: Credential,
        reply: oneshot::Sender<Result<()>>,
    },
    Input(String),
    Report {
        active: bool,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    Reconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    HistoryLines(oneshot::Sender<Vec<String>>),
    CurrentPrompt(oneshot::Sender<String>),
    ExtractValue(oneshot::Sender<String>),
    DownloadTranscript,
    SignedIn(oneshot::Sender<bool>),
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    mode: watch::Receiver<Mode>,
    bridge: TerminalBridge,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Start a session task. It begins disconnected.
    #[must_use]
    pub fn spawn(
        config: &BridgeConfig,
        connector: Arc<dyn ShellConnector>,
        sink: Arc<dyn TerminalSink>,
    ) -> (Self, JoinHandle<()>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let shutdown = CancellationToken::new();
        let bridge = TerminalBridge::new(sink, config.sentinel());
        let modes = ModeController::new();
        let mode = modes.subscribe();

        let actor = SessionActor {
            id,
            conn: ConnectionManager::new(connector, config),
            modes,
            history: HistoryBuffer::new(config.history.max_chars),
            bridge: bridge.clone(),
            handshake: LoginHandshake::new(config),
            sentinel: config.sentinel(),
            commands: rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                id,
                commands: tx,
                mode,
                bridge,
                shutdown,
            },
            task,
        )
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.mode.borrow()
    }

    /// Receiver notified on every mode change.
    #[must_use]
    pub fn subscribe_mode(&self) -> watch::Receiver<Mode> {
        self.mode.clone()
    }

    /// Display controls that do not need the session task.
    #[must_use]
    pub const fn bridge(&self) -> &TerminalBridge {
        &self.bridge
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::SessionClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| BridgeError::SessionClosed)
    }

    /// Sign in, replacing any existing channel.
    ///
    /// # Errors
    /// Authentication, protocol and connection failures from the handshake.
    pub async fn login(&self, access: Credential, verify: Credential) -> Result<()> {
        self.request(|reply| Command::Login {
            access,
            verify,
            reply,
        })
        .await?
    }

    /// Queue keystrokes from the widget.
    ///
    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn input(&self, keys: impl Into<String>) -> Result<()> {
        self.send(Command::Input(keys.into())).await
    }

    /// Suppress keystrokes while a report streams.
    ///
    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn enter_report(&self) -> Result<()> {
        self.send(Command::Report { active: true }).await
    }

    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn leave_report(&self) -> Result<()> {
        self.send(Command::Report { active: false }).await
    }

    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.send(Command::Resize { cols, rows }).await
    }

    /// Open a fresh channel without signing in.
    ///
    /// # Errors
    /// Returns [`BridgeError::Connection`] if the host is unreachable.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Close the channel and return to `Disconnected`.
    ///
    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| Command::Logout { reply }).await
    }

    /// Received text split into lines.
    ///
    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn history_lines(&self) -> Result<Vec<String>> {
        self.request(Command::HistoryLines).await
    }

    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn current_prompt(&self) -> Result<String> {
        self.request(Command::CurrentPrompt).await
    }

    /// Value shown in the host's current field prompt.
    ///
    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn extract_value(&self) -> Result<String> {
        self.request(Command::ExtractValue).await
    }

    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn download_transcript(&self) -> Result<()> {
        self.send(Command::DownloadTranscript).await
    }

    /// Whether the live channel came from a completed sign-in.
    ///
    /// # Errors
    /// Returns [`BridgeError::SessionClosed`] if the session has ended.
    pub async fn is_signed_in(&self) -> Result<bool> {
        self.request(Command::SignedIn).await
    }

    /// Stop the session task and release the channel.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct SessionActor {
    id: Uuid,
    conn: ConnectionManager,
    modes: ModeController,
    history: HistoryBuffer,
    bridge: TerminalBridge,
    handshake: LoginHandshake,
    sentinel: Sentinel,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::info!(session_id = %self.id, "Session started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                chunk = self.conn.next_chunk(), if self.conn.is_open() => self.on_output(chunk),
            }
        }

        self.conn.close();
        self.modes.force_disconnected();
        tracing::info!(session_id = %self.id, "Session ended");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Login {
                access,
                verify,
                reply,
            } => {
                let result = self.login(access, verify).await;
                let _ = reply.send(result);
            }
            Command::Input(keys) => self.on_input(&keys).await,
            Command::Report { active } => {
                let changed = if active {
                    self.modes.enter_report()
                } else {
                    self.modes.leave_report()
                };
                if !changed {
                    tracing::debug!(session_id = %self.id, active, mode = %self.modes.mode(), "Report toggle ignored");
                }
            }
            Command::Resize { cols, rows } => {
                if let Err(e) = self.conn.resize(cols, rows) {
                    tracing::warn!(session_id = %self.id, error = %e, "Resize failed");
                }
            }
            Command::Reconnect { reply } => {
                let result = self.reconnect().await;
                let _ = reply.send(result);
            }
            Command::Logout { reply } => {
                tracing::info!(session_id = %self.id, "Logging out");
                self.conn.close();
                self.modes.force_disconnected();
                let _ = reply.send(());
            }
            Command::HistoryLines(reply) => {
                let lines = self.history.lines().map(std::borrow::Cow::into_owned).collect();
                let _ = reply.send(lines);
            }
            Command::CurrentPrompt(reply) => {
                let _ = reply.send(self.history.current_prompt());
            }
            Command::ExtractValue(reply) => {
                let _ = reply.send(self.history.extract_value());
            }
            Command::DownloadTranscript => self.bridge.download_transcript(&self.history),
            Command::SignedIn(reply) => {
                let _ = reply.send(self.modes.is_signed_in());
            }
        }
    }

    async fn login(&mut self, mut access: Credential, mut verify: Credential) -> Result<()> {
        tracing::info!(session_id = %self.id, "Signing in");
        self.modes.force_disconnected();

        let result = self
            .handshake
            .run(
                &mut self.conn,
                &mut self.history,
                &self.bridge,
                &mut access,
                &mut verify,
                &self.shutdown,
            )
            .await;

        match result {
            Ok(rounds) => {
                self.modes.connected(true);
                tracing::info!(session_id = %self.id, rounds, "Signed in");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Sign-in failed");
                self.conn.close();
                self.modes.force_disconnected();
                Err(e)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.modes.force_disconnected();
        match self.conn.open().await {
            Ok(()) => {
                self.modes.connected(false);
                tracing::info!(session_id = %self.id, "Reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Reconnect failed");
                Err(e)
            }
        }
    }

    async fn on_input(&mut self, keys: &str) {
        match self.modes.route(keys) {
            Route::Reconnect => {
                tracing::debug!(session_id = %self.id, "Keystroke while disconnected");
                if let Err(e) = self.reconnect().await {
                    self.bridge.echo(format!("\r\n[reconnect failed: {e}]\r\n"));
                }
            }
            Route::Suppress => {
                tracing::trace!(session_id = %self.id, "Keystrokes suppressed in report mode");
            }
            Route::Passthrough => {
                let sent = self.conn.send_keys(keys);
                self.after_write(sent).await;
            }
            Route::Command => {
                let sent = self
                    .conn
                    .send_keys(keys)
                    .and_then(|()| self.conn.send_keys(&self.sentinel.encode()));
                self.after_write(sent).await;
            }
        }
    }

    async fn after_write(&mut self, sent: Result<()>) {
        match sent {
            Ok(()) => {}
            Err(e) if e.is_stale() => {
                tracing::warn!(session_id = %self.id, "Channel disposed, reconnecting");
                self.conn.close();
                self.modes.force_disconnected();
                self.bridge.echo("\r\n[session lost, reconnecting]\r\n");
                if let Err(e) = self.reconnect().await {
                    self.bridge.echo(format!("\r\n[reconnect failed: {e}]\r\n"));
                }
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "Write failed");
                self.conn.close();
                self.modes.force_disconnected();
                self.bridge.echo(format!("\r\n[{e}]\r\n"));
            }
        }
    }

    fn on_output(&mut self, chunk: Option<String>) {
        let Some(text) = chunk else {
            tracing::warn!(session_id = %self.id, "Host closed the channel");
            self.conn.close();
            self.modes.force_disconnected();
            self.bridge.echo("\r\n[connection closed]\r\n");
            return;
        };

        if self.sentinel.found_in(&text) && self.modes.sentinel_echoed() {
            tracing::trace!(session_id = %self.id, "Response complete");
        }
        let visible = self.sentinel.strip(&text).into_owned();
        self.bridge.write_host(&visible);
        self.history.append(visible);
    }
}
