//! Line decoding for upstream event streams and frame helpers for the
//! downstream OpenAI stream.
//!
//! Upstream reads can split both lines and multi-byte UTF-8 sequences at any
//! byte; the decoder carries both kinds of remainder between reads.

use std::borrow::Cow;

use memchr::memrchr;

pub(crate) const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Longest unterminated line kept in memory before it is discarded.
pub const MAX_LINE_BYTES: usize = 2 * 1024 * 1024;

/// Incremental `\n`-delimited line splitter over raw bytes.
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes of an incomplete UTF-8 sequence at the end of the last read.
    remainder: Vec<u8>,
    /// Decoded text after the last newline.
    buffered: String,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one read and return the lines it completed, without their
    /// terminators.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<String> {
        self.decode_utf8(bytes);

        let Some(last_newline) = memrchr(b'\n', self.buffered.as_bytes()) else {
            if self.buffered.len() > MAX_LINE_BYTES {
                tracing::warn!(
                    len = self.buffered.len(),
                    "discarding oversized upstream line"
                );
                self.buffered.clear();
            }
            return Vec::new();
        };
        let tail = self.buffered.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffered, tail);
        complete[..last_newline]
            .split('\n')
            .map(str::to_owned)
            .collect()
    }

    /// Text left after the final newline once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.remainder.is_empty() {
            self.remainder.clear();
            self.buffered.push(char::REPLACEMENT_CHARACTER);
        }
        if self.buffered.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffered))
        }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        let input: Cow<'_, [u8]> = if self.remainder.is_empty() {
            Cow::Borrowed(bytes)
        } else {
            let mut joined = std::mem::take(&mut self.remainder);
            joined.extend_from_slice(bytes);
            Cow::Owned(joined)
        };

        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffered.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    self.buffered
                        .push_str(std::str::from_utf8(&rest[..valid_up_to]).unwrap_or_default());
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.buffered.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid_up_to + invalid_len..];
                        }
                        None => {
                            self.remainder.extend_from_slice(&rest[valid_up_to..]);
                            return;
                        }
                    }
                }
            }
        }
    }
}
