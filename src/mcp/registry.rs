//! Tool registry and executor
//!
//! [`ToolRegistry`] discovers the gateway's tools with `tools/list`, caches
//! them for a fixed TTL, validates arguments against each tool's input
//! schema, and invokes tools with `tools/call`.
//!
//! # Caching
//!
//! The cache is replaced wholesale; entries never expire individually.
//! Readers of a valid cache only take a read lock. Refills are serialized by
//! a per-registry discovery lock and re-check the cache after acquiring it,
//! so N concurrent callers that find the cache empty cause exactly one
//! `tools/list` round trip.
//!
//! [`ToolRegistry::clear`] bumps a generation counter. A fetch that was
//! already in flight when the cache was cleared returns its result to its
//! caller but does not install it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::error::{Result, ToolgateError};
use crate::mcp::normalize::{normalize, NormalizedResult};
use crate::mcp::protocol::RpcCaller;
use crate::mcp::schema;
use crate::mcp::types::{
    CallToolParams, ListToolsResponse, PaginatedParams, ToolDescriptor, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST,
};
use crate::metrics::ToolCallMetrics;

/// Upper bound on `tools/list` pages fetched in one discovery.
pub const MAX_DISCOVERY_PAGES: usize = 100;

/// Discovered tools keyed by name.
pub type ToolMap = HashMap<String, ToolDescriptor>;

#[derive(Debug)]
struct ToolCache {
    tools: Arc<ToolMap>,
    fetched_at: Instant,
}

/// A successful tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// The tool that ran.
    pub tool: String,
    /// The normalized result.
    pub result: NormalizedResult,
    /// Wall-clock time of the `tools/call` round trip.
    pub elapsed: Duration,
}

/// Cached, validated access to a gateway's tools.
///
/// The registry only issues calls; it never connects or disconnects the
/// engine behind its [`RpcCaller`].
#[derive(Debug)]
pub struct ToolRegistry {
    caller: Arc<dyn RpcCaller>,
    ttl: Duration,
    call_timeout: Duration,
    cache: std::sync::RwLock<Option<ToolCache>>,
    generation: AtomicU64,
    discovery: tokio::sync::Mutex<()>,
}

impl ToolRegistry {
    /// Create an empty registry.
    ///
    /// # Arguments
    ///
    /// * `caller` - Issues `tools/list` and `tools/call`
    /// * `ttl` - How long a discovery result stays valid
    /// * `call_timeout` - Deadline for each `tools/call`
    pub fn new(caller: Arc<dyn RpcCaller>, ttl: Duration, call_timeout: Duration) -> Self {
        Self {
            caller,
            ttl,
            call_timeout,
            cache: std::sync::RwLock::new(None),
            generation: AtomicU64::new(0),
            discovery: tokio::sync::Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<Arc<ToolMap>> {
        self.cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.tools))
    }

    /// Whether a discovery result is cached and still within its TTL.
    pub fn is_cache_valid(&self) -> bool {
        self.cached().is_some()
    }

    /// Return the tool set, fetching it if the cache is empty or stale.
    ///
    /// # Errors
    ///
    /// Any error from `tools/list`, or [`ToolgateError::Protocol`] if a page
    /// cannot be decoded.
    pub async fn discover(&self) -> Result<Arc<ToolMap>> {
        if let Some(tools) = self.cached() {
            return Ok(tools);
        }

        let _guard = self.discovery.lock().await;
        if let Some(tools) = self.cached() {
            tracing::debug!("tool cache filled by concurrent discovery");
            return Ok(tools);
        }
        self.fetch_all().await
    }

    /// Fetch the tool set unconditionally, replacing the cache.
    ///
    /// # Errors
    ///
    /// Same as [`Self::discover`]. The previous cache survives a failed
    /// refresh.
    pub async fn refresh(&self) -> Result<Arc<ToolMap>> {
        let _guard = self.discovery.lock().await;
        self.fetch_all().await
    }

    async fn fetch_all(&self) -> Result<Arc<ToolMap>> {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut tools = ToolMap::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;

        for page in 0..MAX_DISCOVERY_PAGES {
            let params = match cursor.take() {
                Some(c) => Some(serde_json::to_value(PaginatedParams { cursor: Some(c) })?),
                None => None,
            };
            let raw = self.caller.call(METHOD_TOOLS_LIST, params, None).await?;
            let response: ListToolsResponse = serde_json::from_value(raw).map_err(|e| {
                ToolgateError::Protocol(format!("malformed tools/list result: {e}"))
            })?;

            for tool in response.tools {
                if tools.contains_key(&tool.name) {
                    tracing::warn!(tool = %tool.name, "duplicate tool name; keeping the last");
                }
                tools.insert(tool.name.clone(), tool);
            }

            match response.next_cursor {
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    tracing::warn!(cursor = %next, page, "tools/list cursor repeated; stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if cursor.is_some() {
            tracing::warn!(
                pages = MAX_DISCOVERY_PAGES,
                "tools/list still paginating; using tools fetched so far"
            );
        }

        let tools = Arc::new(tools);
        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(
                count = tools.len(),
                "tool cache cleared during discovery; result not cached"
            );
            return Ok(tools);
        }
        *cache = Some(ToolCache {
            tools: Arc::clone(&tools),
            fetched_at: Instant::now(),
        });
        tracing::info!(count = tools.len(), "discovered tools");
        Ok(tools)
    }

    /// How many times the cache has been cleared.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop the cached tool set.
    pub fn clear(&self) {
        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *cache = None;
        drop(cache);
        tracing::debug!("tool cache cleared");
    }

    /// Look up one tool, discovering if needed.
    ///
    /// # Errors
    ///
    /// [`ToolgateError::ToolNotFound`] with the sorted names of every known
    /// tool when `name` is absent.
    pub async fn get_tool(&self, name: &str) -> Result<ToolDescriptor> {
        let tools = self.discover().await?;
        tools.get(name).cloned().ok_or_else(|| {
            let mut available: Vec<String> = tools.keys().cloned().collect();
            available.sort();
            ToolgateError::ToolNotFound {
                name: name.to_string(),
                available,
            }
        })
    }

    /// Every known tool, sorted by name.
    ///
    /// # Errors
    ///
    /// Same as [`Self::discover`].
    pub async fn list(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self.discover().await?;
        let mut list: Vec<ToolDescriptor> = tools.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// Validate `args` and invoke tool `name`.
    ///
    /// `Value::Null` arguments are sent as an empty object. Validation
    /// happens before any `tools/call`, so invalid arguments never reach the
    /// gateway.
    ///
    /// # Errors
    ///
    /// - [`ToolgateError::ToolNotFound`] for an unknown tool.
    /// - [`ToolgateError::InvalidArguments`] listing every schema violation.
    /// - [`ToolgateError::ToolExecution`] when the result has `isError`.
    /// - Any request error from `tools/call`.
    pub async fn execute(&self, name: &str, args: Value) -> Result<ToolOutcome> {
        let tool = self.get_tool(name).await?;
        let metrics = ToolCallMetrics::new(name);

        let arguments = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args
        };
        let errors = schema::validate(&tool.input_schema, &arguments);
        if !errors.is_empty() {
            metrics.record_completion("invalid_arguments");
            return Err(ToolgateError::InvalidArguments {
                tool: name.to_string(),
                errors,
            });
        }

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        tracing::debug!(tool = name, "calling tool");
        let raw = match self
            .caller
            .call(METHOD_TOOLS_CALL, Some(params), Some(self.call_timeout))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                metrics.record_completion(e.kind().as_str());
                return Err(e);
            }
        };

        let result = normalize(&raw);
        if !result.success {
            let elapsed = metrics.record_completion("tool_error");
            let message = result.error.unwrap_or_default();
            tracing::warn!(tool = name, elapsed_ms = elapsed.as_millis() as u64, %message, "tool reported failure");
            return Err(ToolgateError::ToolExecution {
                tool: name.to_string(),
                message,
            });
        }

        let elapsed = metrics.record_completion("success");
        tracing::info!(tool = name, elapsed_ms = elapsed.as_millis() as u64, "tool call succeeded");
        Ok(ToolOutcome {
            tool: name.to_string(),
            result,
            elapsed,
        })
    }
}
