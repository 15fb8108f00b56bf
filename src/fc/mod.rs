pub mod filter;
pub mod format;
pub mod parser;
pub mod sieve;

pub use filter::{filter_tool_calls, FilterOutcome};
pub use format::{format_tool_call_deltas, ToolCallDelta, ToolCallIdStore};
pub use parser::{
    build_tool_call_candidates, extract_tool_names, parse_standalone_tool_calls,
    parse_standalone_tool_calls_detailed, parse_tool_calls, parse_tool_calls_detailed,
    parse_tool_calls_payload, ParseOutcome, ToolCall,
};
pub use sieve::{RejectedCallPolicy, SieveEvent, SieveEvents, ToolSieve};
