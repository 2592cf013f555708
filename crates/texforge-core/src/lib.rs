//! texforge core library
//!
//! Sandboxed, multi-pass LaTeX compilation: requirement analysis, pass
//! planning, isolated execution, diagnostics classification and result
//! assembly.

pub mod analyzer;
pub mod assembler;
pub mod diagnostics;
pub mod domain;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod planner;
pub mod sandbox;
pub mod status;
pub mod telemetry;

pub use analyzer::{BibTool, DocumentAnalyzer, HeuristicDetector, RequirementDetector, ToolRequirements};
pub use assembler::{assess_success, Compiler};
pub use diagnostics::{DiagnosticsParserConfig, ParsedDiagnostics};
pub use domain::{
    BuildOutcome, BuildRequest, BuildResponse, CompilationOptions, CompileError, ContentEncoding,
    Diagnostic, EngineChoice, FileKind, ResolvedRequest, Result, Severity, SourceFile,
    DEFAULT_MAIN_FILE, DEFAULT_TIMEOUT_MS,
};
pub use metrics::METRICS;
pub use planner::{plan, CompilationPlan, ShellStep, StepKind, RESOLUTION_PASSES};
pub use sandbox::{
    DockerRuntime, ExecutionResult, PullPolicy, RuntimeError, SandboxConfig, SandboxRuntime,
    SandboxedExecutor, StepOutcome, Workspace, DEFAULT_IMAGE,
};
pub use status::{ImagePresenceCache, ProbeReport, StatusProbe};
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI and the daemon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
