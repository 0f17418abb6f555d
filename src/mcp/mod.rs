//! Gateway protocol client
//!
//! Everything needed to talk JSON-RPC 2.0 to a tool gateway and invoke its
//! tools, targeting protocol revision **2025-03-26**.
//!
//! # Module Layout
//!
//! - `types`      -- JSON-RPC primitives and handshake/tool wire types
//! - `transport`  -- `Transport` trait plus stdio, SSE, streaming HTTP, and
//!   fake implementations
//! - `client`     -- ID allocation, response correlation, and the read loop
//! - `protocol`   -- handshake, calls, and shutdown over one transport
//! - `session`    -- single-use connection lifecycle state machine
//! - `schema`     -- structural argument validation
//! - `normalize`  -- flattening of tool result content blocks
//! - `registry`   -- TTL-cached tool discovery and execution
//! - `supervisor` -- retrying connection owner with health reporting
//! - `config`     -- gateway connection settings

pub mod client;
pub mod config;
pub mod normalize;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;
