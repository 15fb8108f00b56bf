use rustc_hash::FxHashMap;
use serde::Serialize;

use super::parser::ToolCall;
use crate::util::new_call_id;

/// Call ids for one response, keyed by the call's position in the response.
///
/// Positions keep counting across batches so a later batch never reuses an
/// id handed out earlier.
#[derive(Debug, Default)]
pub struct ToolCallIdStore {
    ids: FxHashMap<usize, String>,
    next_index: usize,
}

impl ToolCallIdStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembered id for `index`, minting one on first use.
    pub fn id_for(&mut self, index: usize) -> &str {
        self.ids.entry(index).or_insert_with(new_call_id)
    }

    fn reserve(&mut self, count: usize) -> usize {
        let base = self.next_index;
        self.next_index += count;
        base
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDelta {
    pub name: String,
    /// JSON encoding of the call input.
    pub arguments: String,
}

/// Render one call batch as OpenAI streaming `tool_calls` entries.
#[must_use]
pub fn format_tool_call_deltas(calls: &[ToolCall], store: &mut ToolCallIdStore) -> Vec<ToolCallDelta> {
    let base = store.reserve(calls.len());
    calls
        .iter()
        .enumerate()
        .map(|(offset, call)| {
            let index = base + offset;
            ToolCallDelta {
                index,
                id: store.id_for(index).to_string(),
                kind: "function",
                function: FunctionDelta {
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&call.input)
                        .unwrap_or_else(|_| "{}".to_string()),
                },
            }
        })
        .collect()
}
