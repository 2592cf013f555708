//! Result assembly: runs analysis, planning, execution and diagnostics for
//! one request, applies the success policy and always removes the workspace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn, Instrument};

use crate::analyzer::DocumentAnalyzer;
use crate::diagnostics::{self, DiagnosticsParserConfig};
use crate::domain::{BuildOutcome, BuildRequest, BuildResponse, Diagnostic, ResolvedRequest, Result};
use crate::metrics::METRICS;
use crate::obs::{
    build_span, emit_build_finished, emit_build_started, emit_build_timed_out, emit_plan_ready,
    emit_runtime_unavailable,
};
use crate::planner::{self, CompilationPlan};
use crate::sandbox::{DockerRuntime, SandboxConfig, SandboxRuntime, SandboxedExecutor, Workspace};
use crate::status::StatusProbe;

/// Decide whether a build produced a usable result.
///
/// Check-only builds accept either a clean diagnostic list or an artifact.
/// Full builds trust the artifact on disk: later passes routinely clear
/// errors reported by earlier ones.
pub fn assess_success(check_only: bool, errors: &[Diagnostic], artifact: Option<&[u8]>) -> bool {
    if check_only {
        errors.is_empty() || artifact.is_some()
    } else {
        artifact.is_some_and(|bytes| !bytes.is_empty())
    }
}

/// Compiles requests end to end.
pub struct Compiler {
    config: SandboxConfig,
    runtime: Arc<dyn SandboxRuntime>,
    analyzer: DocumentAnalyzer,
    parser_config: DiagnosticsParserConfig,
}

impl Compiler {
    pub fn new(config: SandboxConfig, runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            config,
            runtime,
            analyzer: DocumentAnalyzer::default(),
            parser_config: DiagnosticsParserConfig::default(),
        }
    }

    /// Compiler backed by the container CLI named in `config`.
    pub fn docker(config: SandboxConfig) -> Self {
        let runtime = Arc::new(DockerRuntime::new(config.runtime_binary.clone()));
        Self::new(config, runtime)
    }

    pub fn with_analyzer(mut self, analyzer: DocumentAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_parser_config(mut self, parser_config: DiagnosticsParserConfig) -> Self {
        self.parser_config = parser_config;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn runtime(&self) -> Arc<dyn SandboxRuntime> {
        self.runtime.clone()
    }

    /// A status probe over the same runtime and image.
    pub fn status_probe(&self) -> StatusProbe {
        StatusProbe::new(self.runtime.clone(), &self.config)
    }

    /// Analyze the main file and plan the build, without running anything.
    pub fn plan_for(&self, request: &ResolvedRequest) -> Result<CompilationPlan> {
        let source = request.main().text_content()?;
        let requirements = self.analyzer.analyze(&source);
        Ok(planner::plan(
            &request.main_file_name(),
            &request.main_dir(),
            request.options.engine,
            requirements,
            request.options.check_only,
        ))
    }

    /// Compile one request.
    ///
    /// Malformed requests are rejected before a workspace exists. Once one is
    /// allocated it is removed before this returns, whatever the outcome.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildOutcome> {
        let started = Instant::now();
        let resolved = request.resolve()?;
        let plan = self.plan_for(&resolved)?;

        METRICS.inc_builds_started();
        let workspace = match Workspace::create(&self.config.workspace_root) {
            Ok(ws) => ws,
            Err(e) => {
                METRICS.inc_builds_failed();
                error!(error = %e, "failed to allocate workspace");
                return Err(e);
            }
        };
        let build_id = workspace.id();
        emit_build_started(
            &build_id,
            resolved.options.engine.binary(),
            resolved.files.len(),
            resolved.options.check_only,
        );
        emit_plan_ready(&build_id, plan.len(), plan.engine_passes());

        let result = self
            .run(&workspace, &resolved, &plan, started)
            .instrument(build_span(&build_id))
            .await;

        if let Err(e) = workspace.close() {
            warn!(build_id = %build_id, error = %e, "workspace removal failed");
        }

        match result {
            Ok(outcome) => {
                record(&build_id, &outcome, started);
                Ok(outcome)
            }
            Err(e) => {
                METRICS.inc_builds_failed();
                error!(build_id = %build_id, error = %e, "build failed with internal error");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        workspace: &Workspace,
        resolved: &ResolvedRequest,
        plan: &CompilationPlan,
        started: Instant,
    ) -> Result<BuildOutcome> {
        workspace.materialize(&resolved.files).await?;

        let executor = SandboxedExecutor::new(self.runtime.clone(), self.config.clone());
        let timeout_ms = resolved.options.timeout_ms;
        let execution = executor
            .execute(workspace, plan, Duration::from_millis(timeout_ms))
            .await?;

        if execution.runtime_unavailable {
            let message = execution
                .unavailable_reason
                .unwrap_or_else(|| format!("{} is not available", self.runtime.name()));
            return Ok(BuildOutcome::RuntimeUnavailable { message });
        }

        if let Some(step) = execution.aborted_at() {
            info!(
                step = %step.kind.name(),
                exit_code = ?step.exit_code,
                "build stopped at failed step"
            );
        }

        let output = execution.combined_output();
        let parsed = diagnostics::parse(&output, &self.parser_config);
        let artifact = workspace.read_output(&plan.artifact_path()).await?;

        let check_only = resolved.options.check_only;
        let success = !execution.timed_out
            && assess_success(check_only, &parsed.errors, artifact.as_deref());

        let warnings = parsed.warning_messages();
        let mut response = BuildResponse {
            success,
            artifact: None,
            artifact_sha256: None,
            log: diagnostics::log_lines(&output),
            errors: parsed.errors,
            warnings,
            plan_steps: plan.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };
        if success && !check_only {
            if let Some(bytes) = artifact {
                response.artifact_sha256 = Some(hex::encode(Sha256::digest(&bytes)));
                response.artifact = Some(bytes);
            }
        }

        if execution.timed_out {
            return Ok(BuildOutcome::TimedOut {
                timeout_ms,
                response,
            });
        }
        Ok(BuildOutcome::Finished(response))
    }
}

fn record(build_id: &str, outcome: &BuildOutcome, started: Instant) {
    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        BuildOutcome::Finished(response) => {
            if response.success {
                METRICS.inc_builds_succeeded();
            } else {
                METRICS.inc_builds_failed();
            }
            emit_build_finished(build_id, duration_ms, response.errors.len(), response.success);
        }
        BuildOutcome::TimedOut { timeout_ms, .. } => {
            METRICS.inc_builds_timed_out();
            emit_build_timed_out(build_id, *timeout_ms);
        }
        BuildOutcome::RuntimeUnavailable { message } => {
            METRICS.inc_runtime_unavailable();
            emit_runtime_unavailable(build_id, message);
        }
    }
}
