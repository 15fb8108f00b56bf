pub mod sse;
pub mod translator;

use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tracing::warn;

use crate::protocol::vendor::{parse_vendor_line, LineOutcome, PartKind};
use sse::LineDecoder;
pub use translator::{FinishReason, TranslationContext, TranslatorOptions};

struct TranslateState<S> {
    upstream: Pin<Box<S>>,
    ctx: TranslationContext,
    idle_timeout: Duration,
}

/// Drive `ctx` over an upstream byte stream, yielding one downstream body
/// chunk per upstream read that produced output.
///
/// A read error, an idle read exceeding `idle_timeout`, or EOF without a
/// terminal marker still ends the response with a terminal frame. Dropping
/// the returned stream drops the upstream reader.
pub fn translate_stream<S, E>(
    upstream: S,
    ctx: TranslationContext,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = TranslateState {
        upstream: Box::pin(upstream),
        ctx,
        idle_timeout,
    };
    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            let read = tokio::time::timeout(state.idle_timeout, state.upstream.next()).await;
            let out = match read {
                Ok(Some(Ok(chunk))) => state.ctx.push_bytes(&chunk),
                Ok(Some(Err(err))) => {
                    warn!(error = %err, "upstream read failed; closing stream");
                    state.ctx.finish(FinishReason::Stop)
                }
                Ok(None) => state.ctx.end_of_stream(),
                Err(_) => {
                    warn!(
                        idle_secs = state.idle_timeout.as_secs(),
                        "upstream stream idle; closing stream"
                    );
                    state.ctx.finish(FinishReason::Stop)
                }
            };
            let done = state.ctx.is_finished();
            if out.is_empty() {
                if done {
                    return None;
                }
                continue;
            }
            let next = if done { None } else { Some(state) };
            return Some((Ok(Bytes::from(out)), next));
        }
    })
}

/// Answer and reasoning text of a complete upstream stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectResult {
    pub text: String,
    pub thinking: String,
}

/// Consume a whole buffered vendor stream.
///
/// Stops at `[DONE]`, an upstream error, or a finished status.
#[must_use]
pub fn collect_stream(body: &[u8], thinking_enabled: bool) -> CollectResult {
    let mut decoder = LineDecoder::new();
    let mut lines = decoder.decode(body);
    lines.extend(decoder.finish());

    let mut result = CollectResult::default();
    let mut kind = PartKind::initial(thinking_enabled);
    for line in &lines {
        match parse_vendor_line(line, thinking_enabled, kind) {
            LineOutcome::Skip => {}
            LineOutcome::Done | LineOutcome::Error { .. } => break,
            LineOutcome::Content(parse) => {
                kind = parse.next_kind;
                for part in &parse.parts {
                    match part.kind {
                        PartKind::Thinking => result.thinking.push_str(&part.text),
                        PartKind::Final => result.text.push_str(&part.text),
                    }
                }
                if parse.finished {
                    break;
                }
            }
        }
    }
    result
}
