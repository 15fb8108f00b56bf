//! Vendor stream to OpenAI `chat.completion.chunk` translation for one response.

use std::time::Instant;

use tracing::{debug, warn};

use crate::fc::{format_tool_call_deltas, RejectedCallPolicy, SieveEvent, SieveEvents, ToolCallIdStore, ToolSieve};
use crate::observability::log_stream_complete;
use crate::observability::token_counter::{build_usage, Usage};
use crate::protocol::openai_chat::stream::{push_delta_frame, push_terminal_frame, ChunkHeader, DeltaBody};
use crate::protocol::vendor::{is_citation, parse_vendor_line, ContentPart, LineOutcome, PartKind};
use crate::stream::sse::{LineDecoder, DONE_FRAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ContentFilter,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ContentFilter => "content_filter",
        }
    }
}

/// Per-response settings resolved before the first upstream byte arrives.
#[derive(Debug, Clone)]
pub struct TranslatorOptions {
    pub session_id: String,
    pub model: String,
    pub created: u64,
    pub thinking_enabled: bool,
    /// Drop `[citation:N]` parts. Only meaningful for search-enabled requests.
    pub filter_citations: bool,
    /// Prompt text used for the `prompt_tokens` estimate.
    pub final_prompt: String,
    /// Declared tool names; `None` disables the tool-call sieve.
    pub tool_names: Option<Vec<String>>,
    pub rejected_call_policy: RejectedCallPolicy,
}

/// Translation state owned by one streamed response.
#[derive(Debug)]
pub struct TranslationContext {
    options: TranslatorOptions,
    current_kind: PartKind,
    thinking_text: String,
    final_text: String,
    first_delta_sent: bool,
    sieve: Option<ToolSieve>,
    tool_ids: ToolCallIdStore,
    lines: LineDecoder,
    finished: bool,
    started: Instant,
}

impl TranslationContext {
    #[must_use]
    pub fn new(options: TranslatorOptions) -> Self {
        let sieve = options
            .tool_names
            .clone()
            .map(|names| ToolSieve::new(names, options.rejected_call_policy));
        Self {
            current_kind: PartKind::initial(options.thinking_enabled),
            options,
            thinking_text: String::new(),
            final_text: String::new(),
            first_delta_sent: false,
            sieve,
            tool_ids: ToolCallIdStore::new(),
            lines: LineDecoder::new(),
            finished: false,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Usage estimate for the text seen so far.
    #[must_use]
    pub fn usage(&self) -> Usage {
        build_usage(&self.options.final_prompt, &self.thinking_text, &self.final_text)
    }

    /// Translate one upstream read into zero or more downstream frames.
    ///
    /// Once the response has finished, further input is ignored.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        let mut out = String::new();
        if self.finished {
            return out;
        }
        for line in self.lines.decode(bytes) {
            self.handle_line(&line, &mut out);
            if self.finished {
                break;
            }
        }
        out
    }

    /// Upstream closed: process the unterminated tail and finish with `stop`.
    pub fn end_of_stream(&mut self) -> String {
        let mut out = String::new();
        if !self.finished {
            if let Some(line) = self.lines.finish() {
                self.handle_line(&line, &mut out);
            }
        }
        out.push_str(&self.finish(FinishReason::Stop));
        out
    }

    /// Flush the sieve and write the terminal frame plus `[DONE]`.
    ///
    /// Calling this again returns an empty string.
    pub fn finish(&mut self, reason: FinishReason) -> String {
        let mut out = String::new();
        if self.finished {
            return out;
        }
        self.finished = true;

        if let Some(mut sieve) = self.sieve.take() {
            let events = sieve.flush();
            self.emit_sieve_events(events, &mut out);
        }

        let usage = self.usage();
        push_terminal_frame(&mut out, &self.header(), reason.as_str(), &usage);
        out.push_str(DONE_FRAME);
        log_stream_complete(&self.options.model, &usage, reason.as_str(), self.started);
        out
    }

    fn header(&self) -> ChunkHeader<'_> {
        ChunkHeader {
            id: &self.options.session_id,
            model: &self.options.model,
            created: self.options.created,
        }
    }

    fn handle_line(&mut self, line: &str, out: &mut String) {
        match parse_vendor_line(line, self.options.thinking_enabled, self.current_kind) {
            LineOutcome::Skip => {}
            LineOutcome::Done => out.push_str(&self.finish(FinishReason::Stop)),
            LineOutcome::Error {
                content_filter,
                message,
            } => {
                warn!(
                    session_id = %self.options.session_id,
                    content_filter,
                    message = %message,
                    "upstream reported an error mid-stream"
                );
                out.push_str(&self.finish(FinishReason::ContentFilter));
            }
            LineOutcome::Content(parse) => {
                self.current_kind = parse.next_kind;
                for part in parse.parts {
                    self.emit_part(part, out);
                }
                if parse.finished {
                    debug!(session_id = %self.options.session_id, "upstream signalled finished");
                    out.push_str(&self.finish(FinishReason::Stop));
                }
            }
        }
    }

    fn emit_part(&mut self, part: ContentPart, out: &mut String) {
        if part.text.is_empty() {
            return;
        }
        if self.options.filter_citations && is_citation(&part.text) {
            return;
        }
        match part.kind {
            PartKind::Thinking => {
                self.thinking_text.push_str(&part.text);
                self.push_delta(out, DeltaBody::Reasoning(&part.text));
            }
            PartKind::Final => {
                self.final_text.push_str(&part.text);
                match self.sieve.as_mut() {
                    Some(sieve) => {
                        let events = sieve.process_chunk(&part.text);
                        self.emit_sieve_events(events, out);
                    }
                    None => self.push_delta(out, DeltaBody::Content(&part.text)),
                }
            }
        }
    }

    fn emit_sieve_events(&mut self, events: SieveEvents, out: &mut String) {
        for event in events {
            match event {
                SieveEvent::Text(text) => {
                    if !text.is_empty() {
                        self.push_delta(out, DeltaBody::Content(&text));
                    }
                }
                SieveEvent::ToolCalls(calls) => {
                    if calls.is_empty() {
                        continue;
                    }
                    let deltas = format_tool_call_deltas(&calls, &mut self.tool_ids);
                    self.push_delta(out, DeltaBody::ToolCalls(&deltas));
                }
            }
        }
    }

    fn push_delta(&mut self, out: &mut String, body: DeltaBody<'_>) {
        let with_role = !self.first_delta_sent;
        self.first_delta_sent = true;
        push_delta_frame(out, &self.header(), with_role, body);
    }
}
