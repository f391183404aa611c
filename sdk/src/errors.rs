//! Error types and handling
//!
//! This module provides the error types used throughout the Vigil engine.
//! All errors implement the `AgentErrorExt` trait which indicates whether
//! an error is transient (worth another attempt) and provides a stable
//! kind tag for structured protocol responses.

use std::path::PathBuf;
use thiserror::Error;

/// Trait for Vigil error extensions
///
/// Classification drives two call sites: the worker loop, which decides
/// retry vs terminal-fail for a task, and the protocol servers, which tag
/// `{error}` responses with a stable kind string.
pub trait AgentErrorExt {
    /// Returns whether the error is transient
    ///
    /// Transient errors (network failures, command timeouts) may succeed on
    /// a later attempt and are eligible for the queue's retry policy.
    /// Non-transient errors are terminal for the operation that raised them.
    fn is_transient(&self) -> bool;

    /// Returns a stable machine-readable kind tag for this error
    fn kind(&self) -> &'static str;
}

/// Main agent error type
///
/// # Error Categories
///
/// - **Config**: malformed startup configuration — fatal, process does not start
/// - **CorruptState**: persisted memory/queue file unreadable — recovered by
///   falling back to empty state plus a surfaced warning
/// - **Transient**: external-service or network failure — retried with backoff
/// - **BlockedCommand**: deny-list match — fatal for that command, never retried
/// - **Timeout**: command killed at its wall-clock limit — counts as a failed
///   attempt, eligible for retry
/// - **Path guards**: working-directory confinement violations
#[derive(Debug, Error)]
pub enum AgentError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Persisted-state errors
    #[error("Corrupt state file {path:?}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    // External reasoning service errors
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Authentication with reasoning service failed: {0}")]
    AuthenticationFailed(String),

    #[error("Plan generation failed: {0}")]
    Generation(String),

    // Command execution errors
    #[error("Command blocked by deny-list: {0}")]
    BlockedCommand(String),

    #[error("Command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // Path confinement errors
    #[error("Path denied: {0:?}")]
    PathDenied(PathBuf),

    #[error("Path outside project root: {0:?}")]
    PathOutsideProject(PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(PathBuf, String),

    // Queue errors
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    // Memory errors
    #[error("Fact not found: {0}")]
    FactNotFound(String),

    // Protocol errors
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentErrorExt for AgentError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Transient(_) | AgentError::Timeout { .. } | AgentError::Io(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "config",
            AgentError::CorruptState { .. } => "corrupt_state",
            AgentError::Transient(_) => "transient",
            AgentError::AuthenticationFailed(_) => "auth_failed",
            AgentError::Generation(_) => "generation",
            AgentError::BlockedCommand(_) => "blocked_command",
            AgentError::Timeout { .. } => "timeout",
            AgentError::PathDenied(_) => "path_denied",
            AgentError::PathOutsideProject(_) => "path_outside_project",
            AgentError::PathCanonicalization(..) => "path_canonicalization",
            AgentError::UnknownTask(_) => "unknown_task",
            AgentError::FactNotFound(_) => "fact_not_found",
            AgentError::UnknownMethod(_) => "unknown_method",
            AgentError::MissingParameter(_) => "missing_parameter",
            AgentError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::Transient("connection reset".into()).is_transient());
        assert!(AgentError::Timeout { seconds: 30 }.is_transient());
        assert!(!AgentError::BlockedCommand("rm -rf /".into()).is_transient());
        assert!(!AgentError::Config("bad toml".into()).is_transient());
    }

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(
            AgentError::BlockedCommand("sudo".into()).kind(),
            "blocked_command"
        );
        assert_eq!(AgentError::Timeout { seconds: 1 }.kind(), "timeout");
        assert_eq!(
            AgentError::FactNotFound("missing".into()).kind(),
            "fact_not_found"
        );
    }
}
