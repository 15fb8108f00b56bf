//! Brace matching over partially received JSON text.
//!
//! The scanner only tracks object depth and string/escape state. It never
//! validates the JSON grammar; that is left to `serde_json` once an object is
//! known to be structurally complete.

/// Result of scanning for the end of a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectScan {
    /// `true` once the brace opened at the start index has been closed.
    pub complete: bool,
    /// Index just past the matching `}` when `complete`, otherwise the
    /// buffer length reached so far.
    pub end: usize,
}

impl ObjectScan {
    #[inline]
    const fn incomplete(end: usize) -> Self {
        Self {
            complete: false,
            end,
        }
    }
}

/// Find the end of the JSON object whose opening brace sits at `open`.
///
/// Returns an incomplete result when the buffer ends before the depth
/// returns to zero, or when `open` does not point at `{`.
#[must_use]
pub fn scan_object(buffer: &str, open: usize) -> ObjectScan {
    let mut cursor = ObjectCursor::new(open);
    cursor.advance(buffer)
}

/// Incremental form of [`scan_object`] for a buffer that only grows by
/// appending. Each call resumes where the previous one stopped.
#[derive(Debug, Clone, Default)]
pub struct ObjectCursor {
    start: usize,
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
    done: Option<usize>,
}

impl ObjectCursor {
    #[must_use]
    pub fn new(start: usize) -> Self {
        Self {
            start,
            pos: start,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Continue scanning `buffer`, which must extend the text seen by the
    /// previous calls.
    pub fn advance(&mut self, buffer: &str) -> ObjectScan {
        if let Some(end) = self.done {
            return ObjectScan {
                complete: true,
                end,
            };
        }
        let bytes = buffer.as_bytes();
        if !self.started {
            if bytes.get(self.start) != Some(&b'{') {
                return ObjectScan::incomplete(bytes.len());
            }
            self.started = true;
            self.depth = 1;
            self.pos = self.start + 1;
        }

        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            self.pos += 1;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.done = Some(self.pos);
                        return ObjectScan {
                            complete: true,
                            end: self.pos,
                        };
                    }
                }
                _ => {}
            }
        }
        ObjectScan::incomplete(bytes.len())
    }
}
