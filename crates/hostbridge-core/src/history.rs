//! Bounded, order-preserving history of host output.

use std::{
    borrow::Cow,
    collections::{VecDeque, vec_deque},
};

/// Tokens that end a value picked out by [`HistoryBuffer::extract_value`].
const VALUE_TERMINATORS: [&str; 2] = ["//", "Replace"];

/// An immutable chunk of received text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    text: String,
    chars: usize,
}

impl HistoryEntry {
    fn new(text: String) -> Self {
        let chars = text.chars().count();
        Self { text, chars }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    #[must_use]
    pub const fn chars(&self) -> usize {
        self.chars
    }

    /// The newest `keep` characters of this entry.
    fn suffix(&self, keep: usize) -> Self {
        let skip = self.chars - keep;
        let start = self
            .text
            .char_indices()
            .nth(skip)
            .map_or(self.text.len(), |(i, _)| i);
        Self {
            text: self.text[start..].to_string(),
            chars: keep,
        }
    }
}

/// Output history with a character budget.
///
/// Entries are kept in arrival order with a running character count.
/// Appending past the budget evicts from the oldest end only; if the
/// oldest entry straddles the limit its newest part is kept.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    total_chars: usize,
    max_chars: usize,
}

impl HistoryBuffer {
    /// Create an empty history holding at most `max_chars` characters.
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(32),
            total_chars: 0,
            max_chars,
        }
    }

    /// Append a chunk, then evict from the oldest end until within budget.
    pub fn append(&mut self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        let entry = HistoryEntry::new(chunk);
        self.total_chars = self.total_chars.saturating_add(entry.chars);
        self.entries.push_back(entry);

        while self.total_chars > self.max_chars {
            let excess = self.total_chars - self.max_chars;
            let Some(front) = self.entries.pop_front() else {
                break;
            };
            if front.chars <= excess {
                self.total_chars -= front.chars;
            } else {
                self.entries.push_front(front.suffix(front.chars - excess));
                self.total_chars -= excess;
            }
        }
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_chars = 0;
    }

    /// Running character count.
    #[must_use]
    pub const fn len_chars(&self) -> usize {
        self.total_chars
    }

    #[must_use]
    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// The whole buffer as one string.
    #[must_use]
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.total_chars);
        for entry in &self.entries {
            text.push_str(&entry.text);
        }
        text
    }

    /// Lines of the concatenated buffer.
    ///
    /// Lazy and restartable: clone the iterator to walk it again. A line
    /// that spans entries is assembled on demand.
    #[must_use]
    pub fn lines(&self) -> HistoryLines<'_> {
        HistoryLines {
            entries: self.entries.iter(),
            current: "",
        }
    }

    /// Text after the last line break, or empty if the buffer is empty.
    #[must_use]
    pub fn current_prompt(&self) -> String {
        let mut pieces = Vec::new();
        for entry in self.entries.iter().rev() {
            if let Some(pos) = entry.text.rfind('\n') {
                pieces.push(&entry.text[pos + 1..]);
                break;
            }
            pieces.push(entry.text.as_str());
        }
        pieces.iter().rev().copied().collect()
    }

    /// Value shown after the first colon, up to a default-answer marker.
    ///
    /// Picks `SMITH,JOHN` out of `NAME: SMITH,JOHN// `. Empty when the
    /// buffer has no colon.
    #[must_use]
    pub fn extract_value(&self) -> String {
        let text = self.text();
        let Some(colon) = text.find(':') else {
            return String::new();
        };
        let rest = &text[colon + 1..];
        let end = VALUE_TERMINATORS
            .iter()
            .filter_map(|marker| rest.find(marker))
            .min()
            .unwrap_or(rest.len());
        rest[..end].trim().to_string()
    }
}

/// Iterator returned by [`HistoryBuffer::lines`].
#[derive(Clone)]
pub struct HistoryLines<'a> {
    entries: vec_deque::Iter<'a, HistoryEntry>,
    current: &'a str,
}

impl<'a> Iterator for HistoryLines<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut carry: Option<String> = None;
        loop {
            if self.current.is_empty() {
                match self.entries.next() {
                    Some(entry) => {
                        self.current = &entry.text;
                        continue;
                    }
                    None => return carry.map(Cow::Owned),
                }
            }

            if let Some(pos) = self.current.find('\n') {
                let head = &self.current[..pos];
                self.current = &self.current[pos + 1..];
                return Some(match carry {
                    None => Cow::Borrowed(head.strip_suffix('\r').unwrap_or(head)),
                    Some(mut line) => {
                        line.push_str(head);
                        if line.ends_with('\r') {
                            line.pop();
                        }
                        Cow::Owned(line)
                    }
                });
            }

            carry
                .get_or_insert_with(String::new)
                .push_str(self.current);
            self.current = "";
        }
    }
}
