use super::*;
use serde_json::json;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

// -- parse_tool_calls_payload -------------------------------------------

#[test]
fn payload_tool_calls_wrapper() {
    let calls = parse_tool_calls_payload(
        r#"{"tool_calls":[{"name":"search","input":{"q":"rust"}},{"name":"read","input":{}}]}"#,
    );
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, "search");
    assert_eq!(calls[0].input["q"], "rust");
    assert_eq!(calls[1].name, "read");
    assert!(calls[1].input.is_empty());
}

#[test]
fn payload_bare_array() {
    let calls = parse_tool_calls_payload(r#"[{"name":"a"},"junk",{"name":"b","args":{"x":1}}]"#);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].input["x"], 1);
}

#[test]
fn payload_single_object() {
    let calls = parse_tool_calls_payload(r#"{"name":"lookup","parameters":{"id":7}}"#);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "lookup");
    assert_eq!(calls[0].input["id"], 7);
}

#[test]
fn payload_openai_function_shape_with_string_arguments() {
    let calls = parse_tool_calls_payload(
        r#"{"tool_calls":[{"type":"function","function":{"name":"get_weather","arguments":"{\"city\":\"Paris\"}"}}]}"#,
    );
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "get_weather");
    assert_eq!(calls[0].input["city"], "Paris");
}

#[test]
fn payload_input_priority_prefers_input_key() {
    let calls = parse_tool_calls_payload(
        r#"{"name":"t","input":{"from":"input"},"arguments":{"from":"arguments"},"params":{"from":"params"}}"#,
    );
    assert_eq!(calls[0].input["from"], "input");

    let calls =
        parse_tool_calls_payload(r#"{"name":"t","params":{"from":"params"},"args":{"from":"args"}}"#);
    assert_eq!(calls[0].input["from"], "args");
}

#[test]
fn payload_string_input_variants() {
    let raw = parse_tool_calls_payload(r#"{"name":"t","input":"not json"}"#);
    assert_eq!(raw[0].input["_raw"], "not json");

    let array = parse_tool_calls_payload(r#"{"name":"t","input":"[1,2]"}"#);
    assert_eq!(array[0].input["_raw"], "[1,2]");

    let empty = parse_tool_calls_payload(r#"{"name":"t","input":"   "}"#);
    assert!(empty[0].input.is_empty());
}

#[test]
fn payload_non_object_input_collapses_to_empty() {
    let calls = parse_tool_calls_payload(r#"{"name":"t","input":[1,2,3]}"#);
    assert!(calls[0].input.is_empty());
    let calls = parse_tool_calls_payload(r#"{"name":"t","input":42}"#);
    assert!(calls[0].input.is_empty());
    let calls = parse_tool_calls_payload(r#"{"name":"t","input":null,"arguments":{"a":1}}"#);
    assert!(calls[0].input.is_empty());
}

#[test]
fn payload_without_name_or_invalid_json_yields_nothing() {
    assert!(parse_tool_calls_payload(r#"{"input":{"q":1}}"#).is_empty());
    assert!(parse_tool_calls_payload(r#"{"name":"  "}"#).is_empty());
    assert!(parse_tool_calls_payload(r#"{"tool_calls":[{"name":"x""#).is_empty());
    assert!(parse_tool_calls_payload("42").is_empty());
    assert!(parse_tool_calls_payload(r#"{"tool_calls":[]}"#).is_empty());
    assert!(parse_tool_calls_payload(r#"{"tool_calls":"x"}"#).is_empty());
}

// -- build_tool_call_candidates ------------------------------------------

#[test]
fn candidates_are_ordered_and_deduplicated() {
    let text = r#"  {"tool_calls":[{"name":"a"}]}  "#;
    let candidates = build_tool_call_candidates(text);
    assert_eq!(candidates, vec![r#"{"tool_calls":[{"name":"a"}]}"#.to_string()]);
}

#[test]
fn candidates_include_fence_bodies_and_enclosing_objects() {
    let text = "intro ```json\n{\"name\":\"a\"}\n``` then {\"x\":{\"tool_calls\":[]}} end";
    let candidates = build_tool_call_candidates(text);
    assert_eq!(candidates[0], text.trim());
    assert!(candidates.contains(&r#"{"name":"a"}"#.to_string()));
    assert!(candidates.contains(&r#"{"tool_calls":[]}"#.to_string()));
}

#[test]
fn candidates_reconstruct_tool_calls_array() {
    let text = r#"noise {'tool_calls': [{"name":"a"}] } trailing }"#;
    let candidates = build_tool_call_candidates(text);
    assert_eq!(
        candidates.last().map(String::as_str),
        Some(r#"{"tool_calls":[{"name":"a"}]}"#)
    );
}

#[test]
fn candidate_scan_terminates_when_brace_closes_before_marker() {
    let text = r#"{} tool_calls {} tool_calls"#;
    let candidates = build_tool_call_candidates(text);
    assert_eq!(candidates[0], text);
}

// -- parse_tool_calls_detailed --------------------------------------------

#[test]
fn detailed_finds_call_embedded_in_prose() {
    let text = r#"Sure, calling now: {"tool_calls":[{"name":"search","input":{"q":"x"}}]} done."#;
    let outcome = parse_tool_calls_detailed(text, &names(&["search"]));
    assert!(outcome.saw_tool_call_syntax);
    assert_eq!(outcome.calls.len(), 1);
    assert_eq!(outcome.calls[0].input["q"], "x");
    assert!(!outcome.rejected_by_policy);
}

#[test]
fn detailed_ignores_fenced_examples() {
    let text = "Example:\n```json\n{\"tool_calls\":[{\"name\":\"search\",\"input\":{}}]}\n```";
    let outcome = parse_tool_calls_detailed(text, &names(&["search"]));
    assert!(outcome.calls.is_empty());
    assert!(!outcome.saw_tool_call_syntax);
}

#[test]
fn detailed_reports_policy_rejection() {
    let text = r#"{"tool_calls":[{"name":"rm_rf","input":{}}]}"#;
    let outcome = parse_tool_calls_detailed(text, &names(&["search"]));
    assert!(outcome.calls.is_empty());
    assert!(outcome.saw_tool_call_syntax);
    assert!(outcome.rejected_by_policy);
    assert_eq!(outcome.rejected_names, vec!["rm_rf"]);
}

#[test]
fn detailed_empty_text_is_empty_outcome() {
    assert_eq!(
        parse_tool_calls_detailed("   ", &names(&["a"])),
        ParseOutcome::default()
    );
}

// -- parse_standalone_tool_calls_detailed ---------------------------------

#[test]
fn standalone_requires_leading_json() {
    let allowed = names(&["search"]);
    let outcome =
        parse_standalone_tool_calls_detailed(r#"x {"tool_calls":[{"name":"search"}]}"#, &allowed);
    assert!(outcome.calls.is_empty());
    assert!(outcome.saw_tool_call_syntax);

    let outcome = parse_standalone_tool_calls_detailed(
        "\n {\"tool_calls\":[{\"name\":\"search\",\"input\":{\"q\":1}}]}\n",
        &allowed,
    );
    assert_eq!(outcome.calls.len(), 1);
}

#[test]
fn standalone_rejects_example_context() {
    let outcome = parse_standalone_tool_calls_detailed(
        "{\"tool_calls\":[{\"name\":\"search\"}],\"note\":\"```\"}",
        &names(&["search"]),
    );
    assert_eq!(outcome, ParseOutcome::default());
}

#[test]
fn standalone_canonicalizes_names() {
    let calls = parse_standalone_tool_calls(
        r#"{"tool_calls":[{"name":"search","input":{}}]}"#,
        &names(&["Search"]),
    );
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "Search");
}

// -- helpers ---------------------------------------------------------------

#[test]
fn marker_search_is_case_insensitive() {
    assert_eq!(find_marker("xx TOOL_CALLS", 0), Some(3));
    assert_eq!(find_marker("Tool_Calls then tool_calls", 1), Some(16));
    assert_eq!(find_marker("tool_call", 0), None);
    assert_eq!(find_marker("abc", 10), None);
}

#[test]
fn code_fence_parity() {
    assert!(!inside_code_fence("plain"));
    assert!(inside_code_fence("see ```json\n"));
    assert!(!inside_code_fence("```a``` after"));
}

#[test]
fn tool_names_fall_back_to_unknown() {
    let tools = json!([
        {"type":"function","function":{"name":"search"}},
        {"name":"read"},
        {"type":"function","function":{}},
        "bogus"
    ]);
    assert_eq!(extract_tool_names(&tools), vec!["search", "read", "unknown"]);
    assert!(extract_tool_names(&json!(null)).is_empty());
}
