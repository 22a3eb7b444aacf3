//! SSH client running inside a pseudo-terminal.

use std::io::Read;

use async_trait::async_trait;
use hostbridge_core::{
    BridgeError, ChannelControl, ShellChannel, ShellConnector,
    config::{HostSettings, TerminalSettings},
};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::{mpsc, oneshot};

use crate::locate::resolve_executable_path;

/// Output chunks buffered between the reader thread and the session.
const OUTPUT_QUEUE: usize = 256;

const READ_BUFFER: usize = 4096;

/// Connector that spawns the configured SSH client with a forced TTY.
#[derive(Debug, Default, Clone)]
pub struct SshConnector;

impl SshConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Client arguments for `host`.
///
/// # Errors
/// Returns error if `ssh_options` is not valid shell quoting.
pub fn ssh_args(host: &HostSettings) -> Result<Vec<String>, BridgeError> {
    let extra = shlex::split(&host.ssh_options).ok_or_else(|| {
        BridgeError::Connection(format!("Unparseable ssh_options: {}", host.ssh_options))
    })?;

    let mut args = vec!["-tt".to_string(), "-p".to_string(), host.port.to_string()];
    args.extend(extra);
    if host.user.is_empty() {
        args.push(host.address.clone());
    } else {
        args.push(format!("{}@{}", host.user, host.address));
    }
    Ok(args)
}

fn pty_error<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> BridgeError + '_ {
    move |e| BridgeError::Connection(format!("{context}: {e}"))
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn open(
        &self,
        host: &HostSettings,
        terminal: &TerminalSettings,
    ) -> Result<ShellChannel, BridgeError> {
        let program = resolve_executable_path(&host.ssh_program)
            .await
            .ok_or_else(|| {
                BridgeError::Connection(format!("SSH client not found: {}", host.ssh_program))
            })?;
        let args = ssh_args(host)?;

        tracing::info!(
            host = %host.address,
            port = host.port,
            term = %terminal.term,
            cols = terminal.cols,
            rows = terminal.rows,
            "Opening shell channel"
        );

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: terminal.rows,
                cols: terminal.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error("Failed to open PTY"))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&args);
        cmd.env("TERM", &terminal.term);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(pty_error("Failed to spawn SSH client"))?;
        drop(pair.slave);

        let mut control = PtyControl {
            master: Some(pair.master),
            child: Some(child),
        };

        let (writer, reader) = match control.take_io() {
            Ok(io) => io,
            Err(e) => {
                control.close();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || pump_output(reader, &tx, ready_tx));

        let failure = match tokio::time::timeout(host.connect_timeout(), ready_rx).await {
            Ok(Ok(true)) => None,
            Ok(_) => Some("host closed the connection before sending output".to_string()),
            Err(_) => Some(format!(
                "no response from {}:{} within {}ms",
                host.address, host.port, host.connect_timeout_ms
            )),
        };
        if let Some(reason) = failure {
            control.close();
            return Err(BridgeError::Connection(reason));
        }

        Ok(ShellChannel {
            output: rx,
            writer,
            control: Box::new(control),
        })
    }
}

/// Blocking read loop feeding output chunks to the session.
///
/// Signals `ready` with `true` on the first bytes, `false` if the stream
/// ends first.
fn pump_output(
    mut reader: Box<dyn Read + Send>,
    tx: &mpsc::Sender<Vec<u8>>,
    ready: oneshot::Sender<bool>,
) {
    let mut ready = Some(ready);
    let mut buf = [0u8; READ_BUFFER];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(true);
                }
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!(error = %e, "Shell output ended");
                break;
            }
        }
    }
    if let Some(ready) = ready.take() {
        let _ = ready.send(false);
    }
}

type PtyIo = (Box<dyn std::io::Write + Send>, Box<dyn Read + Send>);

struct PtyControl {
    master: Option<Box<dyn MasterPty + Send>>,
    child: Option<Box<dyn Child + Send + Sync>>,
}

impl PtyControl {
    fn take_io(&self) -> Result<PtyIo, BridgeError> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| BridgeError::Connection("PTY already closed".to_string()))?;
        let writer = master
            .take_writer()
            .map_err(pty_error("Failed to take PTY writer"))?;
        let reader = master
            .try_clone_reader()
            .map_err(pty_error("Failed to clone PTY reader"))?;
        Ok((writer, reader))
    }
}

impl ChannelControl for PtyControl {
    fn resize(&mut self, cols: u16, rows: u16) -> std::io::Result<()> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "SSH client already exited");
            }
            let _ = child.try_wait();
        }
        self.master = None;
    }
}

impl Drop for PtyControl {
    fn drop(&mut self) {
        self.close();
    }
}
