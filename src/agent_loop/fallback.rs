//! JSON-fallback recovery.
//!
//! Models without reliable function calling sometimes answer with a bare JSON
//! object such as `{"keyword": "cats"}` instead of a tool call. These helpers
//! recognize that output and work out which tool was meant.

use crate::tools::{Tool, ToolRegistry};
use serde_json::{Map, Value};
use std::sync::Arc;

pub(super) const SEARCH_TOOL: &str = "search_feeds";
pub(super) const DETAIL_TOOL: &str = "get_feed_detail";

/// A tool call inferred from JSON output.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct FallbackCall {
    /// Tool the payload points at; not yet resolved against a registry
    pub(super) tool_name: &'static str,
    pub(super) arguments: Value,
}

/// Whether `output` structurally begins a JSON object.
pub(super) fn looks_like_json(output: &str) -> bool {
    output.trim_start().starts_with('{')
}

/// Parse `output` and infer the intended tool.
///
/// `keyword` selects search, `feed_id` selects detail, and `query` selects
/// search with the key renamed to `keyword`. Returns `None` when the output
/// is not a JSON object or carries none of these keys.
pub(super) fn infer_call(output: &str) -> Option<FallbackCall> {
    let Ok(Value::Object(mut payload)) = serde_json::from_str::<Value>(output.trim()) else {
        return None;
    };

    if payload.contains_key("keyword") {
        return Some(call(SEARCH_TOOL, payload));
    }
    if payload.contains_key("feed_id") {
        return Some(call(DETAIL_TOOL, payload));
    }
    if let Some(query) = payload.remove("query") {
        payload.insert("keyword".to_string(), query);
        return Some(call(SEARCH_TOOL, payload));
    }
    None
}

fn call(tool_name: &'static str, arguments: Map<String, Value>) -> FallbackCall {
    FallbackCall {
        tool_name,
        arguments: Value::Object(arguments),
    }
}

/// Look the inferred tool up, exactly first and then ignoring case and
/// separators.
pub(super) fn resolve<'a>(tools: &'a ToolRegistry, call: &FallbackCall) -> Option<&'a Arc<dyn Tool>> {
    tools.resolve(call.tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_detection_ignores_leading_whitespace() {
        assert!(looks_like_json("  \n{\"keyword\": \"cats\"}"));
        assert!(!looks_like_json("Here you go: {\"keyword\": \"cats\"}"));
        assert!(!looks_like_json("[1, 2]"));
    }

    #[test]
    fn test_keyword_selects_search() {
        assert_eq!(
            infer_call(r#"{"keyword": "cats", "page": 2}"#),
            Some(FallbackCall {
                tool_name: SEARCH_TOOL,
                arguments: json!({"keyword": "cats", "page": 2}),
            })
        );
    }

    #[test]
    fn test_feed_id_selects_detail() {
        assert_eq!(
            infer_call(r#"{"feed_id": "64f1"}"#).map(|c| c.tool_name),
            Some(DETAIL_TOOL)
        );
    }

    #[test]
    fn test_query_is_renamed_to_keyword() {
        assert_eq!(
            infer_call(r#"{"query": "cats"}"#),
            Some(FallbackCall {
                tool_name: SEARCH_TOOL,
                arguments: json!({"keyword": "cats"}),
            })
        );
    }

    #[test]
    fn test_keyword_wins_over_other_keys() {
        let call = infer_call(r#"{"feed_id": "x", "keyword": "cats"}"#);
        assert_eq!(call.map(|c| c.tool_name), Some(SEARCH_TOOL));
    }

    #[test]
    fn test_unrecognized_or_invalid_payloads() {
        assert_eq!(infer_call(r#"{"answer": 42}"#), None);
        assert_eq!(infer_call(r#"{"keyword": "#), None);
        assert_eq!(infer_call("plain text"), None);
    }
}
