//! Plan execution inside the sandbox.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::SandboxConfig;
use super::error::RuntimeError;
use super::runtime::{ContainerHandle, ContainerSpec, SandboxRuntime};
use super::workspace::Workspace;
use crate::domain::{CompileError, Result};
use crate::obs::emit_step_finished;
use crate::planner::{CompilationPlan, StepKind};

/// Outcome of a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcome {
    pub kind: StepKind,
    /// Display form of the argv (never executed through a shell).
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub tolerant: bool,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Captured output of a plan run.
///
/// A nonzero exit is not an error here: the engine routinely exits nonzero on
/// content problems while still writing a usable PDF.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub runtime_unavailable: bool,
    pub unavailable_reason: Option<String>,
    /// Per-step segments, in execution order.
    pub steps: Vec<StepOutcome>,
}

impl ExecutionResult {
    fn unavailable(reason: String) -> Self {
        Self {
            runtime_unavailable: true,
            unavailable_reason: Some(reason),
            ..Self::default()
        }
    }

    fn push(&mut self, outcome: StepOutcome) {
        append(&mut self.stdout, &outcome.stdout);
        append(&mut self.stderr, &outcome.stderr);
        self.steps.push(outcome);
    }

    /// stdout followed by stderr, as one text for classification.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        append(&mut out, &self.stderr);
        out
    }

    /// The fatal step that stopped the plan early, if any.
    pub fn aborted_at(&self) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| !s.tolerant && !s.timed_out && !s.succeeded())
    }
}

fn append(buf: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(text);
}

/// Removes the container on drop unless cleanup already ran.
struct ContainerGuard {
    runtime: Arc<dyn SandboxRuntime>,
    name: String,
    released: bool,
}

impl ContainerGuard {
    fn new(runtime: Arc<dyn SandboxRuntime>, name: String) -> Self {
        Self {
            runtime,
            name,
            released: false,
        }
    }

    async fn cleanup(mut self) {
        self.released = true;
        if let Err(e) = self.runtime.remove(&self.name).await {
            warn!(container = %self.name, error = %e, "container cleanup failed");
        }
    }

    fn disarm(mut self) {
        self.released = true;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(container = %self.name, "build abandoned, removing container");
            self.runtime.remove_blocking(&self.name);
        }
    }
}

/// Runs a [`CompilationPlan`] in an isolated container over a [`Workspace`].
pub struct SandboxedExecutor {
    runtime: Arc<dyn SandboxRuntime>,
    config: SandboxConfig,
}

impl SandboxedExecutor {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    /// Execute the plan under one wall-clock deadline.
    ///
    /// Runtime unavailability, a missing toolchain image and timeouts are
    /// reported in the result; only
    /// unexpected runtime failures are errors. The container is removed on
    /// every path.
    pub async fn execute(
        &self,
        workspace: &Workspace,
        plan: &CompilationPlan,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let deadline = Instant::now() + timeout;
        let spec = ContainerSpec::for_workspace(&self.config, workspace);
        let guard = ContainerGuard::new(self.runtime.clone(), spec.name.clone());

        let handle = match self.runtime.start(&spec, timeout).await {
            Ok(handle) => handle,
            Err(RuntimeError::Unavailable(reason)) => {
                guard.disarm();
                return Ok(ExecutionResult::unavailable(reason));
            }
            Err(RuntimeError::ImageMissing(image)) => {
                guard.disarm();
                return Ok(ExecutionResult::unavailable(format!(
                    "toolchain image {image} is not present; pull it or allow pulls (pull policy `missing`)"
                )));
            }
            Err(RuntimeError::TimedOut(_)) => {
                guard.cleanup().await;
                return Ok(ExecutionResult {
                    timed_out: true,
                    ..ExecutionResult::default()
                });
            }
            Err(e) => {
                guard.cleanup().await;
                return Err(CompileError::Runtime(e.to_string()));
            }
        };

        let result = self.run_steps(&handle, plan, deadline).await;
        guard.cleanup().await;
        result
    }

    async fn run_steps(
        &self,
        handle: &ContainerHandle,
        plan: &CompilationPlan,
        deadline: Instant,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();

        for step in &plan.steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                result.timed_out = true;
                break;
            }

            debug!(step = %step.kind.name(), command = %step.display_command(), "executing step");
            let output = match self.runtime.exec(handle, step, remaining).await {
                Ok(output) => output,
                Err(RuntimeError::Unavailable(reason)) => {
                    result.runtime_unavailable = true;
                    result.unavailable_reason = Some(reason);
                    break;
                }
                Err(RuntimeError::TimedOut(_)) => {
                    result.timed_out = true;
                    break;
                }
                Err(e) => return Err(CompileError::Runtime(e.to_string())),
            };

            let outcome = StepOutcome {
                kind: step.kind,
                command: step.display_command(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                duration_ms: output.duration_ms,
                timed_out: output.timed_out,
                tolerant: step.tolerant,
            };
            emit_step_finished(&handle.name, &outcome);

            let timed_out = outcome.timed_out;
            let fatal_failure = !outcome.succeeded() && !step.tolerant;
            result.push(outcome);

            if timed_out {
                result.timed_out = true;
                break;
            }
            if fatal_failure {
                info!(step = %step.kind.name(), "fatal step failed, skipping remaining steps");
                break;
            }
        }

        Ok(result)
    }
}
