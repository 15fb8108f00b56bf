//! Incremental separation of prose from inline JSON tool calls.
//!
//! Text arrives in arbitrary network-sized slices. The sieve forwards prose as
//! soon as it is provably not the start of a payload, buffers anything that
//! could still become one, and only releases a call batch once the enclosing
//! JSON object is complete and passes name filtering.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::parser::{
    find_marker, inside_code_fence, parse_standalone_tool_calls_detailed, ToolCall, CODE_FENCE,
    TOOL_CALLS_MARKER,
};
use crate::json_scan::ObjectCursor;

const RECENT_TEXT_TAIL_MAX: usize = 256;

/// What to do with a complete payload whose calls all named undeclared tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectedCallPolicy {
    /// Release the whole payload to the client as ordinary text.
    #[default]
    Text,
    /// Drop the payload, keep the surrounding text.
    Swallow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SieveEvent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

pub type SieveEvents = SmallVec<[SieveEvent; 2]>;

enum Capture {
    Pending,
    Ready {
        prefix: String,
        calls: Vec<ToolCall>,
        suffix: String,
    },
}

impl Capture {
    fn as_text(text: &str) -> Self {
        Capture::Ready {
            prefix: text.to_string(),
            calls: Vec::new(),
            suffix: String::new(),
        }
    }
}

/// Per-response sieve state.
#[derive(Debug)]
pub struct ToolSieve {
    allowed: Vec<String>,
    policy: RejectedCallPolicy,
    pending: String,
    capture: String,
    capturing: bool,
    recent_text_tail: String,
    pending_tool_calls: Vec<ToolCall>,
    pending_tool_raw: String,
    cursor: Option<ObjectCursor>,
}

impl ToolSieve {
    #[must_use]
    pub fn new(allowed: Vec<String>, policy: RejectedCallPolicy) -> Self {
        Self {
            allowed,
            policy,
            pending: String::new(),
            capture: String::new(),
            capturing: false,
            recent_text_tail: String::new(),
            pending_tool_calls: Vec::new(),
            pending_tool_raw: String::new(),
            cursor: None,
        }
    }

    /// Feed one slice of final-answer text.
    pub fn process_chunk(&mut self, chunk: &str) -> SieveEvents {
        self.pending.push_str(chunk);
        let mut events = SieveEvents::new();

        if !self.pending_tool_calls.is_empty() {
            // Blank continuation keeps the batch on hold; anything else means
            // the "calls" were part of a longer answer.
            if self.pending.trim().is_empty() {
                return events;
            }
            let mut content = std::mem::take(&mut self.pending_tool_raw);
            content.push_str(&self.pending);
            self.pending.clear();
            self.pending_tool_calls.clear();
            self.emit_text(&mut events, content);
        }

        loop {
            if self.capturing {
                if !self.pending.is_empty() {
                    self.capture.push_str(&self.pending);
                    self.pending.clear();
                }
                let Capture::Ready {
                    prefix,
                    calls,
                    suffix,
                } = self.consume_capture()
                else {
                    break;
                };
                let captured = self.reset_capture();
                if !calls.is_empty() {
                    // Hold only the object; a blank suffix waits in `pending`
                    // like any later blank continuation.
                    let object_end = captured.len() - suffix.len();
                    self.pending_tool_raw = captured[prefix.len()..object_end].to_string();
                    self.pending_tool_calls = calls;
                    if !prefix.is_empty() {
                        self.emit_text(&mut events, prefix);
                    }
                    self.pending.push_str(&suffix);
                    break;
                }
                if !prefix.is_empty() {
                    self.emit_text(&mut events, prefix);
                }
                self.pending.push_str(&suffix);
                continue;
            }

            if self.pending.is_empty() {
                break;
            }

            if let Some(start) = find_tool_segment_start(&self.pending) {
                let segment = self.pending.split_off(start);
                let prefix = std::mem::take(&mut self.pending);
                if !prefix.is_empty() {
                    self.emit_text(&mut events, prefix);
                }
                self.capture.push_str(&segment);
                self.capturing = true;
                self.cursor = None;
                continue;
            }

            let safe_len = safe_prefix_len(&self.pending);
            if safe_len == 0 {
                break;
            }
            let hold = self.pending.split_off(safe_len);
            let safe = std::mem::replace(&mut self.pending, hold);
            self.emit_text(&mut events, safe);
        }
        events
    }

    /// Drain everything still held at end of stream.
    pub fn flush(&mut self) -> SieveEvents {
        let mut events = self.process_chunk("");

        if !self.pending_tool_calls.is_empty() {
            events.push(SieveEvent::ToolCalls(std::mem::take(
                &mut self.pending_tool_calls,
            )));
            self.pending_tool_raw.clear();
        }

        if self.capturing {
            match self.consume_capture() {
                Capture::Ready {
                    prefix,
                    calls,
                    suffix,
                } => {
                    if !prefix.is_empty() {
                        self.emit_text(&mut events, prefix);
                    }
                    if !calls.is_empty() {
                        events.push(SieveEvent::ToolCalls(calls));
                    }
                    if !suffix.is_empty() {
                        self.emit_text(&mut events, suffix);
                    }
                }
                Capture::Pending => {
                    let captured = std::mem::take(&mut self.capture);
                    if !captured.is_empty() {
                        self.emit_text(&mut events, captured);
                    }
                }
            }
            self.reset_capture();
        }

        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit_text(&mut events, rest);
        }
        events
    }

    fn consume_capture(&mut self) -> Capture {
        let captured = self.capture.as_str();
        let Some(key) = find_marker(captured, 0) else {
            return Capture::Pending;
        };
        let Some(start) = captured[..key].rfind('{') else {
            return Capture::Pending;
        };

        let cursor = self
            .cursor
            .get_or_insert_with(|| ObjectCursor::new(start));
        if cursor.start() != start {
            *cursor = ObjectCursor::new(start);
        }
        let scan = cursor.advance(captured);
        if !scan.complete {
            return Capture::Pending;
        }

        let prefix = &captured[..start];
        let suffix = &captured[scan.end..];

        let mut fence_probe = String::with_capacity(self.recent_text_tail.len() + prefix.len());
        fence_probe.push_str(&self.recent_text_tail);
        fence_probe.push_str(prefix);
        if inside_code_fence(&fence_probe) {
            return Capture::as_text(captured);
        }
        if !self.recent_text_tail.trim().is_empty()
            || !prefix.trim().is_empty()
            || !suffix.trim().is_empty()
        {
            return Capture::as_text(captured);
        }

        let outcome = parse_standalone_tool_calls_detailed(&captured[start..scan.end], &self.allowed);
        if !outcome.calls.is_empty() {
            return Capture::Ready {
                prefix: prefix.to_string(),
                calls: outcome.calls,
                suffix: suffix.to_string(),
            };
        }
        if outcome.saw_tool_call_syntax && outcome.rejected_by_policy {
            tracing::debug!(
                rejected = ?outcome.rejected_names,
                policy = ?self.policy,
                "tool call payload named undeclared tools"
            );
            return match self.policy {
                RejectedCallPolicy::Text => Capture::as_text(captured),
                RejectedCallPolicy::Swallow => Capture::Ready {
                    prefix: prefix.to_string(),
                    calls: Vec::new(),
                    suffix: suffix.to_string(),
                },
            };
        }
        Capture::as_text(captured)
    }

    fn reset_capture(&mut self) -> String {
        self.capturing = false;
        self.cursor = None;
        std::mem::take(&mut self.capture)
    }

    fn emit_text(&mut self, events: &mut SieveEvents, text: String) {
        self.note_text(&text);
        events.push(SieveEvent::Text(text));
    }

    fn note_text(&mut self, text: &str) {
        self.recent_text_tail.push_str(text);
        let len = self.recent_text_tail.len();
        if len > RECENT_TEXT_TAIL_MAX {
            let mut cut = len - RECENT_TEXT_TAIL_MAX;
            while !self.recent_text_tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.recent_text_tail.drain(..cut);
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary detection
// ---------------------------------------------------------------------------

/// Start of the first marker occurrence that is not inside an open fence,
/// backed up to the nearest `{` before it when there is one.
fn find_tool_segment_start(text: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(key) = find_marker(text, offset) {
        let start = text[..key].rfind('{').unwrap_or(key);
        if !inside_code_fence(&text[..start]) {
            return Some(start);
        }
        offset = key + TOOL_CALLS_MARKER.len();
    }
    None
}

/// Length of the prefix of `text` that cannot be part of a payload.
///
/// Held back: everything from the earliest `{` or `[` that is still unclosed,
/// an open code fence, and a run of trailing backticks that may grow into one.
fn safe_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut hold = bytes.len();

    let mut openers: SmallVec<[usize; 8]> = SmallVec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'{' | b'[' => openers.push(i),
            b'}' | b']' => {
                openers.pop();
            }
            b'"' if !openers.is_empty() => in_string = true,
            _ => {}
        }
    }
    if let Some(&first_open) = openers.first() {
        hold = hold.min(first_open);
    }

    if let Some(last_fence) = text.rfind(CODE_FENCE) {
        if inside_code_fence(&text[..last_fence + CODE_FENCE.len()]) {
            hold = hold.min(last_fence);
        }
    }

    let trailing_ticks = bytes.iter().rev().take_while(|&&b| b == b'`').count();
    if trailing_ticks > 0 {
        hold = hold.min(bytes.len() - trailing_ticks);
    }
    hold
}
