//! Argument validation against tool input schemas
//!
//! Tool descriptors carry a JSON Schema `inputSchema`. Before a call is sent,
//! [`validate`] checks the arguments against it with `jsonschema` and reports
//! every violation. It is a pure function: no I/O and no global state.
//!
//! A schema that does not compile is logged and treated as accepting
//! anything, so a gateway publishing an unusual schema does not make its
//! tool uncallable.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single schema violation.
///
/// `path` is a JSONPath-style pointer into the arguments (`$` is the root,
/// `$.filters.limit` a nested property, `$.tags[2]` an array item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Location of the offending value
    pub path: String,
    /// Human-readable description of the violation
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `args` against `schema`, returning every violation found.
///
/// An empty vector means the arguments are acceptable.
///
/// # Arguments
///
/// * `schema` - The tool's `inputSchema`
/// * `args` - The arguments the caller intends to send
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use toolgate::mcp::schema::validate;
///
/// let schema = json!({
///     "type": "object",
///     "properties": { "query": { "type": "string" } },
///     "required": ["query"]
/// });
///
/// assert!(validate(&schema, &json!({ "query": "rust" })).is_empty());
/// assert_eq!(validate(&schema, &json!({})).len(), 1);
/// ```
pub fn validate(schema: &Value, args: &Value) -> Vec<ValidationError> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => {
            tracing::warn!(error = %e, "tool input schema does not compile; skipping validation");
            return Vec::new();
        }
    };

    validator
        .iter_errors(args)
        .map(|e| ValidationError::new(json_path(&e.instance_path.to_string()), e.to_string()))
        .collect()
}

/// Render a JSON Pointer (`/tags/1`) as a JSONPath (`$.tags[1]`).
fn json_path(pointer: &str) -> String {
    let mut path = String::from("$");
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            path.push('.');
            path.push_str(&segment);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["fast", "deep"] },
                "filters": {
                    "type": "object",
                    "properties": {
                        "since": { "type": ["string", "null"] }
                    },
                    "required": ["since"]
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["query"]
        })
    }

    fn paths(errors: &[ValidationError]) -> Vec<&str> {
        let mut paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_valid_arguments_produce_no_errors() {
        let args = json!({
            "query": "rust",
            "limit": 10,
            "mode": "fast",
            "filters": { "since": null },
            "tags": ["a", "b"]
        });
        assert!(validate(&search_schema(), &args).is_empty());
    }

    #[test]
    fn test_missing_required_field_reported() {
        let errors = validate(&search_schema(), &json!({ "limit": 3 }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "$");
        assert!(errors[0].message.contains("query"), "{}", errors[0].message);
    }

    #[test]
    fn test_wrong_type_reported_with_path() {
        let errors = validate(&search_schema(), &json!({ "query": "x", "limit": "ten" }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "$.limit");
        assert!(errors[0].message.contains("integer"), "{}", errors[0].message);
    }

    #[test]
    fn test_fractional_number_is_not_an_integer() {
        assert_eq!(validate(&json!({ "type": "integer" }), &json!(4.5)).len(), 1);
        assert!(validate(&json!({ "type": "integer" }), &json!(4)).is_empty());
    }

    #[test]
    fn test_number_accepts_integers() {
        assert!(validate(&json!({ "type": "number" }), &json!(7)).is_empty());
    }

    #[test]
    fn test_enum_violation_reported() {
        let errors = validate(&search_schema(), &json!({ "query": "x", "mode": "slow" }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "$.mode");
        assert!(errors[0].message.contains("slow"), "{}", errors[0].message);
    }

    #[test]
    fn test_nested_required_and_array_items() {
        let args = json!({ "query": "x", "filters": {}, "tags": ["ok", 3] });
        let errors = validate(&search_schema(), &args);
        assert_eq!(paths(&errors), vec!["$.filters", "$.tags[1]"]);
    }

    #[test]
    fn test_all_violations_collected() {
        let errors = validate(&search_schema(), &json!({ "limit": true, "mode": 1 }));
        let paths = paths(&errors);
        assert!(paths.contains(&"$"));
        assert!(paths.contains(&"$.limit"));
        assert!(paths.contains(&"$.mode"));
    }

    #[test]
    fn test_additional_properties_false() {
        let schema = json!({
            "type": "object",
            "properties": { "a": {} },
            "additionalProperties": false
        });
        let errors = validate(&schema, &json!({ "a": 1, "z": 2 }));
        assert!(!errors.is_empty());
        assert!(errors.iter().any(|e| e.message.contains('z')));
        assert!(validate(&schema, &json!({ "a": 1 })).is_empty());
    }

    #[test]
    fn test_boolean_schema_accepts_anything() {
        assert!(validate(&json!(true), &json!({ "x": 1 })).is_empty());
    }

    #[test]
    fn test_uncompilable_schema_is_permissive() {
        assert!(validate(&json!({ "type": "uuid" }), &json!(12)).is_empty());
        assert!(validate(&json!({ "type": 5 }), &json!("x")).is_empty());
    }

    #[test]
    fn test_json_path_rendering() {
        assert_eq!(json_path(""), "$");
        assert_eq!(json_path("/text"), "$.text");
        assert_eq!(json_path("/tags/1"), "$.tags[1]");
        assert_eq!(json_path("/a~1b/c~0d"), "$.a/b.c~d");
    }

    #[test]
    fn test_display_format() {
        let e = ValidationError::new("$.a", "bad");
        assert_eq!(e.to_string(), "$.a: bad");
    }
}
