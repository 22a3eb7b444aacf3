//! Keystroke routing state machine.

use hostbridge_core::Mode;
use tokio::sync::watch;

/// What to do with a batch of keystrokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// No channel: open one and drop the keys.
    Reconnect,
    /// Report mode: drop the keys.
    Suppress,
    /// Forward the keys unchanged.
    Passthrough,
    /// Forward the keys, then the sentinel. Mode is already `DefaultReceive`.
    Command,
}

/// Owns the session mode and publishes every change.
///
/// ```text
/// Disconnected --connected--> DefaultInput
/// DefaultInput --line terminator--> DefaultReceive --sentinel echo--> DefaultInput
/// DefaultInput --enter_report--> Report --leave_report--> DefaultInput
/// any --force_disconnected--> Disconnected
/// ```
#[derive(Debug)]
pub struct ModeController {
    mode: watch::Sender<Mode>,
    signed_in: bool,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    #[must_use]
    pub fn new() -> Self {
        let (mode, _) = watch::channel(Mode::Disconnected);
        Self {
            mode,
            signed_in: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.mode.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Mode> {
        self.mode.subscribe()
    }

    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    fn set(&self, next: Mode) {
        self.mode.send_if_modified(|mode| {
            if *mode == next {
                return false;
            }
            tracing::debug!(from = %mode, to = %next, "Mode change");
            *mode = next;
            true
        });
    }

    /// Decide how to handle `keys`, switching mode first when they end a
    /// command line.
    pub fn route(&mut self, keys: &str) -> Route {
        match self.mode() {
            Mode::Disconnected => Route::Reconnect,
            Mode::Report => Route::Suppress,
            Mode::DefaultInput if ends_line(keys) => {
                self.set(Mode::DefaultReceive);
                Route::Command
            }
            Mode::DefaultInput | Mode::DefaultReceive => Route::Passthrough,
        }
    }

    /// The host echoed the sentinel. Returns whether the mode changed.
    pub fn sentinel_echoed(&mut self) -> bool {
        if self.mode() == Mode::DefaultReceive {
            self.set(Mode::DefaultInput);
            true
        } else {
            false
        }
    }

    /// A channel is up and ready for keystrokes.
    pub fn connected(&mut self, signed_in: bool) {
        self.signed_in = signed_in;
        self.set(Mode::DefaultInput);
    }

    pub fn force_disconnected(&mut self) {
        self.signed_in = false;
        self.set(Mode::Disconnected);
    }

    /// Returns false unless the session was idle at the prompt.
    pub fn enter_report(&mut self) -> bool {
        if self.mode() == Mode::DefaultInput {
            self.set(Mode::Report);
            true
        } else {
            false
        }
    }

    pub fn leave_report(&mut self) -> bool {
        if self.mode() == Mode::Report {
            self.set(Mode::DefaultInput);
            true
        } else {
            false
        }
    }
}

fn ends_line(keys: &str) -> bool {
    keys.ends_with('\r') || keys.ends_with('\n')
}
