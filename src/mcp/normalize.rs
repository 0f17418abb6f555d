//! Tool result normalization
//!
//! Gateways answer `tools/call` with a list of typed content blocks. This
//! module flattens that list into a single [`NormalizedResult`] so callers
//! can treat every tool the same way.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message used when a failed result carries no text at all.
pub const GENERIC_TOOL_ERROR: &str = "tool reported an error without details";

/// Uniform view of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    /// `false` when the result carried `isError: true`.
    pub success: bool,
    /// Text of every textual block, joined with `\n`.
    pub content: String,
    /// The original content blocks, untouched.
    pub raw_content: Vec<Value>,
    /// Failure message when `success` is false.
    pub error: Option<String>,
    /// Shape information about the blocks.
    pub metadata: ResultMetadata,
}

/// Shape information recorded for every result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Number of content blocks.
    pub block_count: usize,
    /// Block `type` values in order; `"unknown"` when absent.
    pub block_types: Vec<String>,
    /// The result's `structuredContent`, when the gateway sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

/// Normalize the raw `result` of a successful `tools/call`.
///
/// `text` blocks contribute their text; `resource` blocks contribute their
/// embedded `resource.text`; `tool_result` blocks contribute their `text`
/// or, recursively, their nested `content`. Other block types (images,
/// audio) are kept in `raw_content` only.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use toolgate::mcp::normalize::normalize;
///
/// let result = normalize(&json!({
///     "content": [{"type": "text", "text": "A"}, {"type": "text", "text": "B"}]
/// }));
/// assert!(result.success);
/// assert_eq!(result.content, "A\nB");
/// assert_eq!(result.metadata.block_count, 2);
/// ```
pub fn normalize(result: &Value) -> NormalizedResult {
    let raw_content = result
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = join_text(&raw_content);

    let error = if is_error {
        Some(
            raw_content
                .iter()
                .find_map(error_block_message)
                .or_else(|| (!content.is_empty()).then(|| content.clone()))
                .unwrap_or_else(|| GENERIC_TOOL_ERROR.to_string()),
        )
    } else {
        None
    };

    let metadata = ResultMetadata {
        block_count: raw_content.len(),
        block_types: raw_content
            .iter()
            .map(|b| block_type(b).to_string())
            .collect(),
        structured_content: result.get("structuredContent").cloned(),
    };

    NormalizedResult {
        success: !is_error,
        content,
        raw_content,
        error,
        metadata,
    }
}

fn block_type(block: &Value) -> &str {
    block.get("type").and_then(Value::as_str).unwrap_or("unknown")
}

fn join_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(block_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn block_text(block: &Value) -> Option<String> {
    match block_type(block) {
        "text" => block.get("text").and_then(Value::as_str).map(str::to_string),
        "resource" => block
            .get("resource")
            .and_then(|r| r.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        "tool_result" => {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                return Some(text.to_string());
            }
            match block.get("content") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(nested)) => {
                    let text = join_text(nested);
                    (!text.is_empty()).then_some(text)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn error_block_message(block: &Value) -> Option<String> {
    if block_type(block) != "error" {
        return None;
    }
    ["error", "message", "text"]
        .iter()
        .find_map(|key| block.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
