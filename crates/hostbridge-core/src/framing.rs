//! Sentinel framing over the host's unframed character stream.
//!
//! The host has no message boundaries. After each command the bridge
//! transmits a reserved delimiter character; the host echoes it once it
//! gets around to reading it, which marks the end of the response to the
//! preceding command. The delimiter never appears in legitimate output, so
//! it is stripped before text reaches the terminal widget.

use std::borrow::Cow;

/// Reserved delimiter character used as an end-of-feed marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel(char);

impl Sentinel {
    /// ASCII record separator.
    pub const DEFAULT_CHAR: char = '\u{1e}';

    #[must_use]
    pub const fn new(marker: char) -> Self {
        Self(marker)
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        self.0
    }

    /// Bytes written to the channel to request a boundary.
    #[must_use]
    pub fn encode(self) -> String {
        self.0.to_string()
    }

    /// Whether the host has echoed the marker back.
    #[must_use]
    pub fn found_in(self, text: &str) -> bool {
        text.contains(self.0)
    }

    /// Remove every occurrence of the marker.
    #[must_use]
    pub fn strip(self, text: &str) -> Cow<'_, str> {
        if self.found_in(text) {
            Cow::Owned(text.replace(self.0, ""))
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Trim trailing markers and whitespace from a response.
    #[must_use]
    pub fn trim_response(self, text: &str) -> &str {
        text.trim_end_matches(|c: char| c == self.0 || c.is_whitespace())
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self(Self::DEFAULT_CHAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_borrows_when_absent() {
        let sentinel = Sentinel::default();
        assert!(matches!(sentinel.strip("plain"), Cow::Borrowed("plain")));
        assert_eq!(sentinel.strip("a\u{1e}b\u{1e}"), "ab");
    }

    #[test]
    fn test_trim_response() {
        let sentinel = Sentinel::new('~');
        assert_eq!(sentinel.trim_response("Select Option: ~ \r\n~"), "Select Option:");
        assert_eq!(sentinel.trim_response("~lead"), "~lead");
    }
}
