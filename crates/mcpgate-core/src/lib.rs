//! # mcpgate-core
//!
//! Shared primitives used by every other crate in the workspace: the unified
//! error type, structured-logging redaction helpers, and opaque-token
//! generation for RS access/refresh tokens, authorization codes, and
//! transaction ids.

pub mod error;
pub mod redact;
pub mod token;

pub use error::{ErrorKind, GateError, GateResult};
