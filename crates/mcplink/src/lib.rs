//! # mcplink
//!
//! A bidirectional Model Context Protocol session runtime.
//!
//! ## Overview
//!
//! Either side of a [`Session`] can issue requests, answer requests and send
//! notifications over the same channel. [`Server`] and [`Client`] layer the
//! protocol on top: the `initialize` handshake and capability checks, tool
//! registration and dispatch, progress and log notifications, and sampling
//! requests a tool can send back to the client while it runs.
//!
//! ## Transports
//!
//! - **Stdio**: `server.serve_stdio()`, `client.connect_process(command)`
//! - **HTTP + SSE**: `server.serve_http("127.0.0.1:8080")`,
//!   `client.connect_http("http://127.0.0.1:8080/sse")`
//! - **In-memory**: `serve_stream` / `connect_stream` over any reader/writer
//!   pair, used throughout the tests
//!
//! ## Example
//!
//! ```ignore
//! use mcplink::{CallToolResult, Server, ToolDescriptor, ToolSet, schemars};
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct EchoParams {
//!     /// Text to echo
//!     text: String,
//! }
//!
//! let tools = ToolSet::new();
//! tools.register(
//!     ToolDescriptor::new("echo", |_ctx, args| async move {
//!         let text: String = args.require("echo", "text")?;
//!         Ok(CallToolResult::new().with_text_content(text))
//!     })
//!     .with_schema::<EchoParams>(),
//! )?;
//! Server::new("echo", "1.0.0").with_tools(tools).serve_stdio().await?;
//! ```

/// Argument envelope used by tool calls.
mod arguments;
/// Client implementation and transport orchestration.
mod client;
/// Newline-delimited JSON-RPC framing.
pub mod codec;
/// Handler trait for server-initiated client traffic.
mod connection;
/// Client/server context types.
mod context;
/// Error types and Result alias.
mod error;
/// HTTP + SSE transport implementation.
pub mod http;
/// Handshake state and capability checks.
mod negotiation;
/// Request/response routing and tracking.
mod request_handler;
/// Server implementation and handle types.
mod server;
/// Bidirectional session over one transport.
mod session;
/// Tool registry and dispatcher.
mod toolset;
/// Transport traits and adapters.
pub mod transport;

/// Public schema types for protocol messages.
pub mod schema;
/// Helpers for testing servers, clients and tool handlers in-process.
pub mod testutils;

pub use arguments::Arguments;
pub use client::Client;
pub use connection::ClientHandler;
pub use context::{ClientCtx, LogLevelFilter, ServerCtx};
pub use error::{Error, Result};
pub use negotiation::{PeerInfo, SessionState, negotiate_protocol_version};
pub use request_handler::{CallOptions, DEFAULT_TIMEOUT};
pub use schema::{CallToolResult, Capabilities, Capability, LoggingLevel};
pub use server::{Server, ServerHandle};
pub use session::{RequestCtx, Session, SessionConfig};
pub use toolset::{ToolDescriptor, ToolHandler, ToolSet};

// Re-export schemars so tool parameter types can derive `JsonSchema`.
pub use schemars;

#[cfg(test)]
mod tests {
    use super::schema::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
