//! MCP Server: JSON-RPC dispatch (C7), the Streamable HTTP session facade
//! (C8), the session store (C2), and the request-scoped cancellation
//! registry (C3) this workspace's OAuth resource-server bridge runs behind.
//!
//! Tool/prompt/resource *content* is a collaborator's problem (spec.md §1);
//! this crate only owns the dispatch contract and the session lifecycle
//! around it. Credential resolution and the OAuth flow engine live in
//! `mcpgate_auth`.

#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod facade;
pub mod request_context;
pub mod session;
pub mod tools;

pub use config::ServerSettings;
pub use dispatcher::{DispatchOutcome, Dispatcher, ServerInfo};
pub use facade::{FacadeState, router};
pub use request_context::{CancellationHandle, ContextRegistry, RequestContext};
pub use session::{SessionPatch, SessionRecord, SessionStore};
pub use tools::{CallToolResult, ContentBlock, Tool, ToolHandler, ToolRegistry};
