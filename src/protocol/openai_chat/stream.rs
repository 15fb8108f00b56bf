use crate::fc::ToolCallDelta;
use crate::observability::token_counter::Usage;
use crate::util::{push_json_string_escaped, push_u64_decimal, push_usize_decimal};

/// Fields repeated on every chunk of one response.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader<'a> {
    pub id: &'a str,
    pub model: &'a str,
    pub created: u64,
}

/// Payload of one streamed delta.
#[derive(Debug, Clone, Copy)]
pub enum DeltaBody<'a> {
    Content(&'a str),
    Reasoning(&'a str),
    ToolCalls(&'a [ToolCallDelta]),
}

fn push_openai_chunk_prefix(out: &mut String, header: &ChunkHeader<'_>) {
    out.push_str("data: {\"id\":");
    push_json_string_escaped(out, header.id);
    out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
    push_u64_decimal(out, header.created);
    out.push_str(",\"model\":");
    push_json_string_escaped(out, header.model);
}

/// Append one `chat.completion.chunk` delta frame to `out`.
pub fn push_delta_frame(
    out: &mut String,
    header: &ChunkHeader<'_>,
    with_role: bool,
    body: DeltaBody<'_>,
) {
    push_openai_chunk_prefix(out, header);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{");
    if with_role {
        out.push_str("\"role\":\"assistant\",");
    }
    match body {
        DeltaBody::Content(text) => {
            out.push_str("\"content\":");
            push_json_string_escaped(out, text);
        }
        DeltaBody::Reasoning(text) => {
            out.push_str("\"reasoning_content\":");
            push_json_string_escaped(out, text);
        }
        DeltaBody::ToolCalls(calls) => {
            out.push_str("\"tool_calls\":[");
            for (i, call) in calls.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_tool_call_delta(out, call);
            }
            out.push(']');
        }
    }
    out.push_str("},\"finish_reason\":null}]}\n\n");
}

fn push_tool_call_delta(out: &mut String, call: &ToolCallDelta) {
    out.push_str("{\"index\":");
    push_usize_decimal(out, call.index);
    out.push_str(",\"id\":");
    push_json_string_escaped(out, &call.id);
    out.push_str(",\"type\":");
    push_json_string_escaped(out, call.kind);
    out.push_str(",\"function\":{\"name\":");
    push_json_string_escaped(out, &call.function.name);
    out.push_str(",\"arguments\":");
    push_json_string_escaped(out, &call.function.arguments);
    out.push_str("}}");
}

/// Append the closing chunk carrying `finish_reason` and `usage`.
pub fn push_terminal_frame(
    out: &mut String,
    header: &ChunkHeader<'_>,
    finish_reason: &str,
    usage: &Usage,
) {
    push_openai_chunk_prefix(out, header);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":");
    push_json_string_escaped(out, finish_reason);
    out.push_str("}],\"usage\":{\"prompt_tokens\":");
    push_u64_decimal(out, usage.prompt_tokens);
    out.push_str(",\"completion_tokens\":");
    push_u64_decimal(out, usage.completion_tokens);
    out.push_str(",\"total_tokens\":");
    push_u64_decimal(out, usage.total_tokens);
    out.push_str(",\"completion_tokens_details\":{\"reasoning_tokens\":");
    push_u64_decimal(out, usage.completion_tokens_details.reasoning_tokens);
    out.push_str("}}}\n\n");
}
