use rustc_hash::{FxHashMap, FxHashSet};

use super::parser::ToolCall;

/// Calls split by whether their name matches a declared tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub accepted: Vec<ToolCall>,
    /// Distinct rejected names in first-seen order.
    pub rejected_names: Vec<String>,
}

/// Keep calls whose name matches a declared tool, rewriting the name to its
/// declared spelling.
///
/// Exact matches win; otherwise an ASCII case-insensitive match resolves to
/// the first declared name with that lowercase form. An empty declared set
/// rejects everything.
#[must_use]
pub fn filter_tool_calls(calls: Vec<ToolCall>, allowed: &[String]) -> FilterOutcome {
    let mut exact: FxHashSet<&str> = FxHashSet::default();
    let mut canonical: FxHashMap<String, &str> = FxHashMap::default();
    for name in allowed.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        exact.insert(name);
        canonical.entry(name.to_ascii_lowercase()).or_insert(name);
    }

    let mut outcome = FilterOutcome::default();
    let mut seen_rejected: FxHashSet<String> = FxHashSet::default();
    for call in calls {
        if call.name.is_empty() {
            continue;
        }
        let matched = if exact.contains(call.name.as_str()) {
            Some(call.name.clone())
        } else {
            canonical
                .get(&call.name.to_ascii_lowercase())
                .map(|name| (*name).to_string())
        };
        match matched {
            Some(name) => outcome.accepted.push(ToolCall {
                name,
                input: call.input,
            }),
            None => {
                if seen_rejected.insert(call.name.clone()) {
                    outcome.rejected_names.push(call.name);
                }
            }
        }
    }
    outcome
}
