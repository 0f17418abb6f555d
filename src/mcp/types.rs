//! JSON-RPC 2.0 envelopes and tool-protocol wire types
//!
//! This module defines every wire type the client exchanges with a gateway.
//! Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`, and `Option<>` fields omit their key
//! when `None` via `#[serde(skip_serializing_if = "Option::is_none")]`.
//!
//! Responses are decoded through [`JsonRpcResponse::into_outcome`], which
//! enforces that exactly one of `result` and `error` is present.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolgateError};

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The protocol revision this client advertises in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol revisions accepted in a server's `initialize` result.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05", "2025-06-18"];

/// JSON-RPC version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Method constants
// ---------------------------------------------------------------------------

/// Handshake request.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Sent once after a successful handshake.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
/// Best-effort teardown notification.
pub const NOTIF_SHUTDOWN: &str = "shutdown";
/// Tool discovery.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Tool invocation.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Server signal that its tool set changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is unavailable.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Server-side handshake failure.
pub const HANDSHAKE_FAILED: i64 = -32000;
/// Server-side transport failure.
pub const TRANSPORT_FAILED: i64 = -32001;
/// Server-detected protocol violation.
pub const PROTOCOL_VIOLATION: i64 = -32002;

// ---------------------------------------------------------------------------
// JSON-RPC envelopes
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request, or a notification when `id` is `None`.
///
/// # Examples
///
/// ```
/// use toolgate::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(7, "tools/list", None);
/// let wire = serde_json::to_string(&req).unwrap();
/// assert_eq!(wire, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request that expects a response.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no `id`, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` must be present. Use
/// [`JsonRpcResponse::into_outcome`] to enforce that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build an error response, as sent back for unsupported server requests.
    pub fn error(id: serde_json::Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    /// Split the envelope into its success or error payload.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Protocol`] when both or neither of `result`
    /// and `error` are populated.
    pub fn into_outcome(self) -> Result<std::result::Result<serde_json::Value, JsonRpcError>> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(Ok(result)),
            (None, Some(error)) => Ok(Err(error)),
            (Some(_), Some(_)) => Err(ToolgateError::Protocol(
                "response carries both result and error".to_string(),
            )),
            (None, None) => Err(ToolgateError::Protocol(
                "response carries neither result nor error".to_string(),
            )),
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use toolgate::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or this protocol.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl JsonRpcError {
    /// Classify a server error for the method that produced it.
    ///
    /// The protocol-specific codes map onto the matching client error
    /// classes so that the retry policy treats a server-reported handshake
    /// or transport failure the same way as a locally observed one.
    pub fn into_error(self, method: &str) -> ToolgateError {
        match self.code {
            HANDSHAKE_FAILED => ToolgateError::Handshake(self.message),
            TRANSPORT_FAILED => ToolgateError::Transport(self.message),
            PROTOCOL_VIOLATION => ToolgateError::Protocol(self.message),
            code => ToolgateError::Rpc {
                method: method.to_string(),
                code,
                message: self.message,
                data: self.data,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Version string.
    #[serde(default)]
    pub version: String,
}

/// Capabilities this client advertises during the handshake.
///
/// The client consumes tools only, so the advertisement is intentionally
/// small; `experimental` exists for callers that need to opt in to
/// gateway-specific extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Whether the client handles `roots/list` requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    /// Free-form experimental capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision requested by the client.
    pub protocol_version: String,
    /// Client capability advertisement.
    pub capabilities: ClientCapabilities,
    /// Client identity.
    pub client_info: Implementation,
}

/// Named feature groups a server advertised at handshake.
///
/// Immutable once received. Queried by name rather than by typed field so
/// that groups this client does not know about are still visible.
///
/// # Examples
///
/// ```
/// use toolgate::mcp::types::ServerCapabilities;
///
/// let caps: ServerCapabilities =
///     serde_json::from_value(serde_json::json!({ "tools": { "listChanged": true } })).unwrap();
/// assert!(caps.has("tools"));
/// assert!(!caps.has("prompts"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerCapabilities(pub BTreeMap<String, serde_json::Value>);

impl ServerCapabilities {
    /// Whether the server advertised the named feature group.
    pub fn has(&self, name: &str) -> bool {
        self.0.get(name).map_or(false, |v| !v.is_null())
    }

    /// Names of every advertised group, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// The validated result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision selected by the server.
    pub protocol_version: String,
    /// Server capability groups.
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: Implementation,
    /// Optional usage instructions supplied by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Parse and validate a raw `initialize` result.
    ///
    /// Each required key is checked individually so the error names exactly
    /// which field the server left out.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Handshake`] naming the missing or malformed
    /// field. A protocol revision outside [`SUPPORTED_PROTOCOL_VERSIONS`] is
    /// logged and accepted.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            ToolgateError::Handshake("initialize result is not a JSON object".to_string())
        })?;

        let protocol_version = object
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("protocolVersion"))?
            .to_string();

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&protocol_version.as_str()) {
            tracing::warn!(
                protocol_version = %protocol_version,
                supported = %SUPPORTED_PROTOCOL_VERSIONS.join(", "),
                "gateway selected an unknown protocol version; continuing"
            );
        }

        let capabilities = match object.get("capabilities") {
            Some(caps @ serde_json::Value::Object(_)) => {
                serde_json::from_value::<ServerCapabilities>(caps.clone()).map_err(|e| {
                    ToolgateError::Handshake(format!("malformed field 'capabilities': {e}"))
                })?
            }
            _ => return Err(missing_field("capabilities")),
        };

        let server_info = object
            .get("serverInfo")
            .filter(|v| v.is_object())
            .ok_or_else(|| missing_field("serverInfo"))?;
        let name = server_info
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("serverInfo.name"))?;
        let version = server_info
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        Ok(Self {
            protocol_version,
            capabilities,
            server_info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
            },
            instructions: object
                .get("instructions")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

fn missing_field(field: &str) -> ToolgateError {
    ToolgateError::Handshake(format!("initialize result missing required field '{field}'"))
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// A named, schema-described remote operation.
///
/// Identity is the `name`; two descriptors with the same name describe the
/// same tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name within a registry.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON-Schema-like description of the accepted arguments.
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Parameters of a paginated `tools/list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Opaque cursor from the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of one `tools/list` page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// Tools on this page.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    /// Cursor for the next page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// The tool to invoke.
    pub name: String,
    /// Arguments matching the tool's input schema.
    pub arguments: serde_json::Value,
}
