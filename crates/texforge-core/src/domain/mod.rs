//! Domain types for texforge compilation requests.
//!
//! These types are the contract between callers and the compilation core:
//! what goes in (`BuildRequest`, `SourceFile`), what comes out
//! (`BuildResponse`, `BuildOutcome`, `Diagnostic`) and what can go wrong
//! (`CompileError`).

pub mod diagnostic;
pub mod error;
pub mod request;
pub mod response;
pub mod source;

pub use diagnostic::{Diagnostic, Severity};
pub use error::{CompileError, Result};
pub use request::{
    BuildRequest, CompilationOptions, ResolvedRequest, DEFAULT_MAIN_FILE, DEFAULT_TIMEOUT_MS,
};
pub use response::{BuildOutcome, BuildResponse};
pub use source::{ContentEncoding, EngineChoice, FileKind, SourceFile};
