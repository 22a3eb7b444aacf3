//! Scan the host stream for the first of several candidate markers.

use std::time::Duration;

use async_trait::async_trait;
use hostbridge_core::{BridgeError, HistoryBuffer, ProtocolFailure, Result, Sentinel};
use hostbridge_shell::ConnectionManager;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

/// Source of decoded output chunks.
#[async_trait]
pub trait OutputSource: Send {
    /// Next chunk, or `None` once the stream has ended.
    async fn next_chunk(&mut self) -> Option<String>;
}

#[async_trait]
impl OutputSource for ConnectionManager {
    async fn next_chunk(&mut self) -> Option<String> {
        Self::next_chunk(self).await
    }
}

#[async_trait]
impl OutputSource for mpsc::Receiver<String> {
    async fn next_chunk(&mut self) -> Option<String> {
        self.recv().await
    }
}

/// A marker and what to do when it shows up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<A> {
    pub marker: String,
    pub action: A,
}

/// Ordered candidate markers. Earlier entries win ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet<A> {
    candidates: Vec<Candidate<A>>,
}

impl<A> Default for CandidateSet<A> {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }
}

impl<A> CandidateSet<A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate at the lowest precedence so far.
    pub fn push(&mut self, marker: impl Into<String>, action: A) {
        self.candidates.push(Candidate {
            marker: marker.into(),
            action,
        });
    }

    #[must_use]
    pub fn with(mut self, marker: impl Into<String>, action: A) -> Self {
        self.push(marker, action);
        self
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Candidate<A>> {
        self.candidates.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate<A>> {
        self.candidates.iter()
    }

    /// Index of the first candidate, in list order, present anywhere in `text`.
    #[must_use]
    pub fn first_present(&self, text: &str) -> Option<usize> {
        self.candidates
            .iter()
            .position(|c| text.contains(c.marker.as_str()))
    }
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitMatch {
    /// Index into the candidate set.
    pub index: usize,
    /// Everything read since the wait began.
    pub text: String,
}

/// Reads until a candidate appears or the deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct PatternWaiter {
    timeout: Duration,
    sentinel: Sentinel,
}

impl PatternWaiter {
    #[must_use]
    pub const fn new(timeout: Duration, sentinel: Sentinel) -> Self {
        Self { timeout, sentinel }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for any candidate to appear in the output read since this call.
    ///
    /// Candidates are re-checked in list order after every chunk, so when one
    /// chunk completes two markers the earlier list entry wins regardless of
    /// where each sits in the text. Each chunk is handed to `on_chunk` as it
    /// arrives. Whatever was read is appended to `history`, trimmed, whether
    /// or not a candidate matched.
    ///
    /// # Errors
    /// - [`ProtocolFailure::Timeout`] when the deadline passes.
    /// - [`ProtocolFailure::Cancelled`] when `cancel` fires.
    /// - [`BridgeError::Connection`] when the stream ends first.
    pub async fn wait_for_any<S, A, F>(
        &self,
        source: &mut S,
        candidates: &CandidateSet<A>,
        history: &mut HistoryBuffer,
        on_chunk: F,
        cancel: &CancellationToken,
    ) -> Result<WaitMatch>
    where
        S: OutputSource + ?Sized,
        A: Sync,
        F: FnMut(&str) + Send,
    {
        let mut buffer = String::new();
        let outcome = self
            .read_until_match(source, candidates, &mut buffer, on_chunk, cancel)
            .await;
        history.append(self.sentinel.trim_response(&buffer));
        outcome.map(|index| WaitMatch {
            index,
            text: buffer,
        })
    }

    async fn read_until_match<S, A, F>(
        &self,
        source: &mut S,
        candidates: &CandidateSet<A>,
        buffer: &mut String,
        mut on_chunk: F,
        cancel: &CancellationToken,
    ) -> Result<usize>
    where
        S: OutputSource + ?Sized,
        A: Sync,
        F: FnMut(&str) + Send,
    {
        let deadline = Instant::now() + self.timeout;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(BridgeError::Protocol(ProtocolFailure::Cancelled));
                }
                read = tokio::time::timeout_at(deadline, source.next_chunk()) => match read {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        return Err(BridgeError::Connection(
                            "channel closed while waiting for the host".to_string(),
                        ));
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_ms = self.timeout.as_millis(),
                            tail = %tail(buffer),
                            "No expected prompt before deadline"
                        );
                        return Err(BridgeError::Protocol(ProtocolFailure::Timeout(self.timeout)));
                    }
                },
            };

            on_chunk(&chunk);
            buffer.push_str(&chunk);
            if let Some(index) = candidates.first_present(buffer) {
                return Ok(index);
            }
        }
    }
}

/// Last few characters of `text`, for log context.
fn tail(text: &str) -> &str {
    let start = text
        .char_indices()
        .rev()
        .nth(39)
        .map_or(0, |(i, _)| i);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn waiter() -> PatternWaiter {
        PatternWaiter::new(Duration::from_millis(100), Sentinel::new('~'))
    }

    fn source(chunks: &[&str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        for chunk in chunks {
            tx.try_send((*chunk).to_string()).unwrap();
        }
        // Keep the stream open so an unmatched wait times out instead of ending.
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_list_order_wins_within_one_chunk() {
        let candidates = CandidateSet::new()
            .with("ACCESS CODE:", 'a')
            .with("ption:", 'b');
        let mut rx = source(&["Select Option: ... ACCESS CODE: "]);
        let mut history = HistoryBuffer::new(1000);

        let found = assert_ok!(
            waiter()
                .wait_for_any(&mut rx, &candidates, &mut history, |_| (), &CancellationToken::new())
                .await
        );
        assert_eq!(found.index, 0);
    }

    #[tokio::test]
    async fn test_marker_split_across_chunks() {
        let candidates = CandidateSet::new().with("VERIFY CODE:", ());
        let mut rx = source(&["ACCESS CODE: \r\nVERI", "FY CODE: ~\r\n"]);
        let mut history = HistoryBuffer::new(1000);

        let found = assert_ok!(
            waiter()
                .wait_for_any(&mut rx, &candidates, &mut history, |_| (), &CancellationToken::new())
                .await
        );
        assert_eq!(found.index, 0);
        assert_eq!(found.text, "ACCESS CODE: \r\nVERIFY CODE: ~\r\n");
        assert_eq!(history.text(), "ACCESS CODE: \r\nVERIFY CODE:");
    }

    #[tokio::test]
    async fn test_earlier_chunk_match_is_not_overridden() {
        let candidates = CandidateSet::new().with("first", 1).with("second", 2);
        let mut rx = source(&["second", "first"]);
        let mut history = HistoryBuffer::new(1000);

        let found = assert_ok!(
            waiter()
                .wait_for_any(&mut rx, &candidates, &mut history, |_| (), &CancellationToken::new())
                .await
        );
        assert_eq!(found.index, 1);
    }

    #[tokio::test]
    async fn test_deadline() {
        let candidates = CandidateSet::new().with("never", ());
        let mut rx = source(&["something else"]);
        let mut history = HistoryBuffer::new(1000);

        let err = assert_err!(
            waiter()
                .wait_for_any(&mut rx, &candidates, &mut history, |_| (), &CancellationToken::new())
                .await
        );
        assert!(matches!(
            err,
            BridgeError::Protocol(ProtocolFailure::Timeout(_))
        ));
        assert_eq!(history.text(), "something else");
    }

    #[tokio::test]
    async fn test_each_chunk_reaches_hook_before_match() {
        let candidates = CandidateSet::new().with("ption:", ());
        let mut rx = source(&["Volume set: ROU\r\n", "Select Option: "]);
        let mut history = HistoryBuffer::new(1000);
        let mut seen = Vec::new();

        let found = assert_ok!(
            waiter()
                .wait_for_any(
                    &mut rx,
                    &candidates,
                    &mut history,
                    |chunk| seen.push(chunk.to_string()),
                    &CancellationToken::new()
                )
                .await
        );
        assert_eq!(found.index, 0);
        assert_eq!(seen, vec!["Volume set: ROU\r\n", "Select Option: "]);
        assert_eq!(history.text(), "Volume set: ROU\r\nSelect Option:");
    }

    #[tokio::test]
    async fn test_cancelled() {
        let candidates = CandidateSet::new().with("never", ());
        let mut rx = source(&[]);
        let mut history = HistoryBuffer::new(1000);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = assert_err!(
            waiter()
                .wait_for_any(&mut rx, &candidates, &mut history, |_| (), &cancel)
                .await
        );
        assert!(matches!(err, BridgeError::Protocol(ProtocolFailure::Cancelled)));
    }

    #[tokio::test]
    async fn test_stream_end_is_connection_error() {
        let candidates = CandidateSet::new().with("never", ());
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);
        let mut history = HistoryBuffer::new(1000);

        let err = assert_err!(
            waiter()
                .wait_for_any(&mut rx, &candidates, &mut history, |_| (), &CancellationToken::new())
                .await
        );
        assert!(matches!(err, BridgeError::Connection(_)));
    }
}
