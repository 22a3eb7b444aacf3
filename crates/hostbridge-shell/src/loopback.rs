//! In-memory host for tests and demos.
//!
//! [`loopback`] returns a connector to hand to the session and a
//! [`LoopbackHost`] handle for playing the host's side: greeting text sent
//! on every open, canned replies triggered by writes, and counters for
//! opened, closed and live channels.

use std::{
    io::Write,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use hostbridge_core::{
    BridgeError, ChannelControl, Mode, ShellChannel, ShellConnector,
    config::{HostSettings, TerminalSettings},
};
use tokio::sync::{mpsc, watch};

const OUTPUT_QUEUE: usize = 256;

/// One write observed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Sequence number of the channel written to, starting at 1.
    pub channel: usize,
    pub text: String,
    /// Session mode at the moment of the write, if a mode watch is attached.
    pub mode: Option<Mode>,
}

struct Rule {
    trigger: String,
    reply: String,
}

#[derive(Default)]
struct Shared {
    greeting: Vec<String>,
    rules: Vec<Rule>,
    refuse: bool,
    opened: usize,
    closed: usize,
    live: usize,
    peak_live: usize,
    current: usize,
    disposed: bool,
    output: Option<mpsc::Sender<Vec<u8>>>,
    writes: Vec<WriteRecord>,
    resizes: Vec<(u16, u16)>,
    mode_watch: Option<watch::Receiver<Mode>>,
}

impl Shared {
    fn emit(&self, text: &str) {
        if let Some(tx) = &self.output {
            if tx.try_send(text.as_bytes().to_vec()).is_err() {
                tracing::warn!("Loopback output queue full or closed");
            }
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Create a connected connector/host pair.
#[must_use]
pub fn loopback() -> (LoopbackConnector, LoopbackHost) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        LoopbackConnector {
            shared: Arc::clone(&shared),
        },
        LoopbackHost { shared },
    )
}

/// Connector side of the loopback.
pub struct LoopbackConnector {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl ShellConnector for LoopbackConnector {
    async fn open(
        &self,
        _host: &HostSettings,
        _terminal: &TerminalSettings,
    ) -> Result<ShellChannel, BridgeError> {
        let mut shared = lock(&self.shared);
        if shared.refuse {
            return Err(BridgeError::Connection("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
        shared.opened += 1;
        shared.live += 1;
        shared.peak_live = shared.peak_live.max(shared.live);
        shared.current = shared.opened;
        shared.disposed = false;
        shared.output = Some(tx);
        for line in shared.greeting.clone() {
            shared.emit(&line);
        }

        let channel = shared.current;
        Ok(ShellChannel {
            output: rx,
            writer: Box::new(LoopbackWriter {
                shared: Arc::clone(&self.shared),
                channel,
            }),
            control: Box::new(LoopbackControl {
                shared: Arc::clone(&self.shared),
                channel,
                closed: false,
            }),
        })
    }
}

struct LoopbackWriter {
    shared: Arc<Mutex<Shared>>,
    channel: usize,
}

impl Write for LoopbackWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut shared = lock(&self.shared);
        if shared.disposed || shared.current != self.channel {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        let text = String::from_utf8_lossy(buf).into_owned();
        let mode = shared.mode_watch.as_ref().map(|rx| *rx.borrow());
        let replies: Vec<String> = shared
            .rules
            .iter()
            .filter(|rule| text.contains(&rule.trigger))
            .map(|rule| rule.reply.clone())
            .collect();
        shared.writes.push(WriteRecord {
            channel: self.channel,
            text,
            mode,
        });
        for reply in replies {
            shared.emit(&reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct LoopbackControl {
    shared: Arc<Mutex<Shared>>,
    channel: usize,
    closed: bool,
}

impl ChannelControl for LoopbackControl {
    fn resize(&mut self, cols: u16, rows: u16) -> std::io::Result<()> {
        lock(&self.shared).resizes.push((cols, rows));
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut shared = lock(&self.shared);
        shared.closed += 1;
        shared.live = shared.live.saturating_sub(1);
        if shared.current == self.channel {
            shared.output = None;
        }
    }
}

/// Host side of the loopback.
#[derive(Clone)]
pub struct LoopbackHost {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackHost {
    /// Text sent on every newly opened channel.
    pub fn greet<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.shared).greeting = lines.into_iter().map(Into::into).collect();
    }

    /// Send `reply` whenever a single write contains `trigger`.
    pub fn reply_on(&self, trigger: impl Into<String>, reply: impl Into<String>) {
        lock(&self.shared).rules.push(Rule {
            trigger: trigger.into(),
            reply: reply.into(),
        });
    }

    /// Make subsequent opens fail.
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.shared).refuse = refuse;
    }

    /// Send output on the current channel.
    pub fn push(&self, text: &str) {
        lock(&self.shared).emit(text);
    }

    /// Fail writes on the current channel as if its handle were disposed.
    pub fn dispose(&self) {
        lock(&self.shared).disposed = true;
    }

    /// Close the current channel's output stream from the host side.
    pub fn hang_up(&self) {
        lock(&self.shared).output = None;
    }

    /// Record the session mode alongside every write.
    pub fn observe_mode(&self, mode: watch::Receiver<Mode>) {
        lock(&self.shared).mode_watch = Some(mode);
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.shared).writes.clone()
    }

    /// Every write concatenated.
    #[must_use]
    pub fn written_text(&self) -> String {
        lock(&self.shared)
            .writes
            .iter()
            .map(|w| w.text.as_str())
            .collect()
    }

    #[must_use]
    pub fn resizes(&self) -> Vec<(u16, u16)> {
        lock(&self.shared).resizes.clone()
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        lock(&self.shared).opened
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        lock(&self.shared).closed
    }

    /// Channels opened and not yet closed.
    #[must_use]
    pub fn live(&self) -> usize {
        lock(&self.shared).live
    }

    /// Highest number of simultaneously live channels.
    #[must_use]
    pub fn peak_live(&self) -> usize {
        lock(&self.shared).peak_live
    }
}
