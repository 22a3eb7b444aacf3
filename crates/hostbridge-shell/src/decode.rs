//! Incremental UTF-8 decoding of output chunks.

/// Decoder that carries incomplete multi-byte sequences between chunks.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    /// Decode as much of `pending + chunk` as is complete.
    ///
    /// Invalid bytes become U+FFFD; a truncated sequence at the end is
    /// held back for the next chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
                        out.push_str(text);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sequence_is_carried() {
        let bytes = "Größe".as_bytes();
        let mut stream = Utf8Stream::default();
        assert_eq!(stream.decode(&bytes[..3]), "Gr");
        assert_eq!(stream.decode(&bytes[3..]), "öße");
    }

    #[test]
    fn test_invalid_byte_replaced() {
        let mut stream = Utf8Stream::default();
        assert_eq!(stream.decode(b"a\xffb"), "a\u{fffd}b");
    }
}
