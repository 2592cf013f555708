//! Error taxonomy for compilation requests.
//!
//! Only request rejection and internal failures are errors. Timeouts, an
//! unreachable container runtime and toolchain diagnostics are reported as
//! data on [`crate::BuildOutcome`].

/// Hard failures of a compilation request.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Whether the caller sent something we refuse to build.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CompileError::InvalidRequest(_))
    }
}

/// Result type for compilation operations.
pub type Result<T> = std::result::Result<T, CompileError>;
