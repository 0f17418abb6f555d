//! Tool invocation command

use crate::error::{Result, ToolgateError};
use crate::mcp::supervisor::ConnectionSupervisor;
use serde_json::Value;

/// Parse the `--args` flag into a JSON object
///
/// A missing flag means no arguments (`{}`).
///
/// # Errors
///
/// Returns `ToolgateError::Config` if the text is not JSON or not an object
pub fn parse_arguments(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ToolgateError::Config(format!("--args is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(ToolgateError::Config(
            "--args must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Invoke one tool and print its result
///
/// Plain output is the normalized text content; `json` prints the whole
/// normalized result including metadata and raw blocks.
///
/// # Arguments
///
/// * `supervisor` - A connected supervisor
/// * `tool` - Tool name
/// * `raw_args` - The `--args` flag, if given
/// * `json` - Print the normalized result as JSON
///
/// # Errors
///
/// Returns argument parsing errors, and every error from
/// [`ConnectionSupervisor::execute`] (unknown tool, invalid arguments, tool
/// failure, transport or protocol errors)
pub async fn call_tool(
    supervisor: &ConnectionSupervisor,
    tool: &str,
    raw_args: Option<&str>,
    json: bool,
) -> Result<()> {
    let args = parse_arguments(raw_args)?;
    tracing::info!(tool, "Calling tool");

    let outcome = supervisor.execute(tool, args).await?;
    tracing::debug!(
        tool,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        blocks = outcome.result.metadata.block_count,
        "Tool call finished"
    );

    if json {
        super::print_json(&outcome.result)
    } else {
        println!("{}", outcome.result.content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments_absent_is_empty_object() {
        assert_eq!(parse_arguments(None).unwrap(), json!({}));
    }

    #[test]
    fn test_parse_arguments_object() {
        let value = parse_arguments(Some(r#"{"text": "hi", "n": 2}"#)).unwrap();
        assert_eq!(value, json!({"text": "hi", "n": 2}));
    }

    #[test]
    fn test_parse_arguments_rejects_non_object() {
        assert!(matches!(
            parse_arguments(Some("[1, 2]")),
            Err(ToolgateError::Config(_))
        ));
    }

    #[test]
    fn test_parse_arguments_rejects_malformed_json() {
        assert!(matches!(
            parse_arguments(Some("{text: hi}")),
            Err(ToolgateError::Config(_))
        ));
    }
}
