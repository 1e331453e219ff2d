//! Failure taxonomy of the shadow harness.
//!
//! Fatal classes (`ProcessNotFound`, `MalformedDiff`) abort the invocation.
//! An alert-service failure is normally a value (`ServiceResult::Failed`) and
//! only becomes `AlertService` when safe mode requires failing closed. A type
//! missing from the policy is not an error at all.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a healthy run.
pub const EXIT_OK: i32 = 0;
/// Exit code when the policy blocked the operation.
pub const EXIT_POLICY_VIOLATION: i32 = 1;
/// Exit code when the tool itself could not complete.
pub const EXIT_MALFUNCTION: i32 = 2;
/// Exit code when the real binary could not be located, as a shell would.
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum ShadowError {
    /// The real package-manager binary is not on the search path.
    #[error("could not find the real `{bin}` executable (searched {searched} PATH entries)")]
    ProcessNotFound { bin: String, searched: usize },

    /// The diff walk exceeded its node budget: the tree is cyclic or malformed.
    #[error("infinite loop detected: diff walk visited more than {limit} nodes")]
    MalformedDiff { limit: usize },

    /// The alert service failed and the session is configured to fail closed.
    #[error("alert lookup failed: {message}")]
    AlertService {
        message: String,
        cause: Option<String>,
    },

    /// The decision engine or a writer could not produce the report.
    #[error("failed to generate report: {0}")]
    ReportGeneration(String),

    /// The security policy rejected the operation.
    #[error("operation blocked by security policy: {reason}")]
    Blocked { reason: String },

    /// The parent/child handshake did not complete.
    #[error("IPC handshake failed: {0}")]
    Handshake(String),

    #[error("failed to install shim at {path}: {source}")]
    ShimInstall {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShadowError {
    /// Process exit code that lets callers tell "insecure code" apart from
    /// "tool malfunction".
    pub fn exit_code(&self) -> i32 {
        match self {
            ShadowError::ProcessNotFound { .. } => EXIT_NOT_FOUND,
            ShadowError::Blocked { .. } => EXIT_POLICY_VIOLATION,
            _ => EXIT_MALFUNCTION,
        }
    }
}
