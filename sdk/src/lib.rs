//! Vigil SDK
//!
//! Shared library providing the error taxonomy and protocol framing types
//! used by both the agent engine and external protocol clients.

/// Error types and handling
pub mod errors;

/// Protocol request/response framing
pub mod protocol;

// Re-export commonly used types
pub use errors::{AgentError, AgentErrorExt};
pub use protocol::{ErrorBody, Request, Response};
