//! One-way fan-out from the session to the browser terminal.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use hostbridge_core::{
    BridgeError, HistoryBuffer, QueryReply, Result, ScrollTarget, Sentinel, TerminalCommand,
    TerminalQuery, TerminalSink, TextOrigin, WindowGeometry,
};

/// Pushes display commands to the widget and asks it for values.
///
/// Host text and local echo can be hidden independently. The sentinel is
/// removed from host text before it is shown.
#[derive(Clone)]
pub struct TerminalBridge {
    sink: Arc<dyn TerminalSink>,
    sentinel: Sentinel,
    host_visible: Arc<AtomicBool>,
    echo_visible: Arc<AtomicBool>,
}

impl TerminalBridge {
    #[must_use]
    pub fn new(sink: Arc<dyn TerminalSink>, sentinel: Sentinel) -> Self {
        Self {
            sink,
            sentinel,
            host_visible: Arc::new(AtomicBool::new(true)),
            echo_visible: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Display text received from the host.
    pub fn write_host(&self, text: &str) {
        if !self.host_visible.load(Ordering::Relaxed) {
            return;
        }
        let text = self.sentinel.strip(text);
        if text.is_empty() {
            return;
        }
        self.sink.push(TerminalCommand::Write {
            text: text.into_owned(),
            origin: TextOrigin::Host,
        });
    }

    /// Display locally generated text.
    pub fn echo(&self, text: impl Into<String>) {
        if !self.echo_visible.load(Ordering::Relaxed) {
            return;
        }
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.sink.push(TerminalCommand::Write {
            text,
            origin: TextOrigin::Echo,
        });
    }

    pub fn set_host_visible(&self, visible: bool) {
        self.host_visible.store(visible, Ordering::Relaxed);
    }

    pub fn set_echo_visible(&self, visible: bool) {
        self.echo_visible.store(visible, Ordering::Relaxed);
    }

    #[must_use]
    pub fn host_visible(&self) -> bool {
        self.host_visible.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn echo_visible(&self) -> bool {
        self.echo_visible.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.sink.push(TerminalCommand::Clear);
    }

    pub fn reinitialize(&self) {
        self.sink.push(TerminalCommand::Reinitialize);
    }

    pub fn scroll_to(&self, target: ScrollTarget) {
        self.sink.push(TerminalCommand::ScrollTo(target));
    }

    pub fn scroll_to_bottom(&self) {
        self.scroll_to(ScrollTarget::Bottom);
    }

    /// Offer the full history as a text file download.
    pub fn download_transcript(&self, history: &HistoryBuffer) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.sink.push(TerminalCommand::DownloadTranscript {
            file_name: format!("transcript-{secs}.txt"),
            contents: history.text(),
        });
    }

    pub fn copy_to_clipboard(&self, text: impl Into<String>) {
        self.sink.push(TerminalCommand::CopyToClipboard { text: text.into() });
    }

    pub fn show_dialog(&self, id: impl Into<String>) {
        self.sink.push(TerminalCommand::ShowDialog { id: id.into() });
    }

    pub fn hide_dialog(&self, id: impl Into<String>) {
        self.sink.push(TerminalCommand::HideDialog { id: id.into() });
    }

    /// Read the browser clipboard.
    ///
    /// # Errors
    /// Returns [`BridgeError::Terminal`] if the widget does not answer or
    /// answers with something else.
    pub async fn read_clipboard(&self) -> Result<String> {
        match self.sink.query(TerminalQuery::Clipboard).await? {
            QueryReply::Clipboard { text } => Ok(text),
            other => Err(unexpected(&other)),
        }
    }

    /// Read the browser window size.
    ///
    /// # Errors
    /// Returns [`BridgeError::Terminal`] if the widget does not answer or
    /// answers with something else.
    pub async fn window_geometry(&self) -> Result<WindowGeometry> {
        match self.sink.query(TerminalQuery::WindowGeometry).await? {
            QueryReply::WindowGeometry(geometry) => Ok(geometry),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(reply: &QueryReply) -> BridgeError {
    BridgeError::Terminal(format!("unexpected reply: {reply:?}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        pushed: Mutex<Vec<TerminalCommand>>,
    }

    #[async_trait]
    impl TerminalSink for Recorder {
        fn push(&self, command: TerminalCommand) {
            self.pushed.lock().unwrap().push(command);
        }

        async fn query(&self, query: TerminalQuery) -> Result<QueryReply> {
            match query {
                TerminalQuery::Clipboard => Ok(QueryReply::Clipboard {
                    text: "DFN 1234".to_string(),
                }),
                TerminalQuery::WindowGeometry => {
                    Err(BridgeError::Terminal("no answer".to_string()))
                }
            }
        }
    }

    fn bridge() -> (TerminalBridge, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TerminalSink> = recorder.clone();
        (TerminalBridge::new(sink, Sentinel::new('~')), recorder)
    }

    #[test]
    fn test_host_text_is_stripped_and_tagged() {
        let (bridge, recorder) = bridge();
        bridge.write_host("Select Option: ~");
        bridge.write_host("~");
        bridge.echo("[reconnecting]");

        let pushed = recorder.pushed.lock().unwrap();
        assert_eq!(
            *pushed,
            vec![
                TerminalCommand::Write {
                    text: "Select Option: ".to_string(),
                    origin: TextOrigin::Host,
                },
                TerminalCommand::Write {
                    text: "[reconnecting]".to_string(),
                    origin: TextOrigin::Echo,
                },
            ]
        );
    }

    #[test]
    fn test_visibility_toggles_are_independent() {
        let (bridge, recorder) = bridge();
        bridge.set_host_visible(false);
        bridge.write_host("hidden");
        bridge.echo("shown");
        bridge.set_host_visible(true);
        bridge.set_echo_visible(false);
        bridge.write_host("shown too");
        bridge.echo("hidden");

        let pushed = recorder.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 2);
        assert!(!bridge.echo_visible());
    }

    #[test]
    fn test_transcript_carries_history() {
        let (bridge, recorder) = bridge();
        let mut history = HistoryBuffer::new(100);
        history.append("line one\r\n");
        history.append("line two");
        bridge.download_transcript(&history);

        let pushed = recorder.pushed.lock().unwrap();
        match &pushed[0] {
            TerminalCommand::DownloadTranscript {
                file_name,
                contents,
            } => {
                assert!(file_name.starts_with("transcript-"));
                assert_eq!(contents, "line one\r\nline two");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_queries() {
        let (bridge, _recorder) = bridge();
        assert_eq!(assert_ok!(bridge.read_clipboard().await), "DFN 1234");
        assert!(matches!(
            assert_err!(bridge.window_geometry().await),
            BridgeError::Terminal(_)
        ));
    }
}
