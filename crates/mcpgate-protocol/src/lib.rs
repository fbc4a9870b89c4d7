//! # mcpgate-protocol
//!
//! JSON-RPC 2.0 message types, the MCP supported-protocol-version table, and
//! cursor-based pagination helpers used by the dispatcher and HTTP façade.

pub mod jsonrpc;
pub mod pagination;
pub mod versions;

pub use jsonrpc::{
    JsonRpcBatch, JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, RequestId, ResponseId,
};
pub use versions::{LATEST_PROTOCOL_VERSION, negotiate_version};
