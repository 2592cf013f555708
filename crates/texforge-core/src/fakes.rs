//! In-memory sandbox runtime (testing only)
//!
//! `ScriptedRuntime` satisfies the [`SandboxRuntime`] contract without a
//! container engine. By default every engine pass succeeds and writes a small
//! PDF next to the main file; builders script failures, timeouts, a missing
//! image and an unreachable runtime.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::planner::{ShellStep, StepKind};
use crate::sandbox::{
    ContainerHandle, ContainerSpec, ExecOutput, RuntimeError, RuntimeResult, SandboxRuntime,
};

/// Bytes written as the fake artifact.
pub const FAKE_PDF: &[u8] = b"%PDF-1.5\n% texforge fake artifact\n%%EOF\n";

/// Scripted result for one step kind.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    unavailable: Option<String>,
    fail_start: Option<String>,
    start_times_out: bool,
    image_missing: bool,
    without_artifact: bool,
    artifact_link: Option<PathBuf>,
    hang_on: Option<StepKind>,
    scripts: HashMap<StepKind, ScriptedStep>,

    live: Mutex<HashSet<String>>,
    executed: Mutex<Vec<ShellStep>>,
    started: AtomicUsize,
    removed: AtomicUsize,
    image_checks: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call reports the runtime as unreachable.
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    /// Container start fails with an unexpected runtime error.
    pub fn fail_start(mut self, reason: impl Into<String>) -> Self {
        self.fail_start = Some(reason.into());
        self
    }

    /// Container start exceeds its time limit.
    pub fn start_times_out(mut self) -> Self {
        self.start_times_out = true;
        self
    }

    /// The toolchain image is not present locally: probes report it absent
    /// and container start fails.
    pub fn image_missing(mut self) -> Self {
        self.image_missing = true;
        self
    }

    /// Engine passes never write the PDF.
    pub fn without_artifact(mut self) -> Self {
        self.without_artifact = true;
        self
    }

    /// Engine passes leave a symlink to `target` where the PDF belongs,
    /// the way a shell-escape build could.
    pub fn link_artifact_to(mut self, target: impl Into<PathBuf>) -> Self {
        self.artifact_link = Some(target.into());
        self
    }

    /// The step of this kind runs until its time limit, emitting partial output.
    pub fn hang_on(mut self, kind: StepKind) -> Self {
        self.hang_on = Some(kind);
        self
    }

    /// Script exit code and stdout for a step kind.
    pub fn on_step(mut self, kind: StepKind, exit_code: i32, stdout: impl Into<String>) -> Self {
        self.scripts.insert(
            kind,
            ScriptedStep {
                exit_code,
                stdout: stdout.into(),
                stderr: String::new(),
            },
        );
        self
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn image_checks(&self) -> usize {
        self.image_checks.load(Ordering::SeqCst)
    }

    /// Containers started and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Kinds of the steps executed so far, in order.
    pub fn executed(&self) -> Vec<StepKind> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| s.kind)
            .collect()
    }

    /// Full steps executed so far, in order.
    pub fn executed_steps(&self) -> Vec<ShellStep> {
        self.executed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn forget(&self, name: &str) {
        if self.live.lock().unwrap_or_else(|e| e.into_inner()).remove(name) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write_artifact(&self, handle: &ContainerHandle, step: &ShellStep) -> std::io::Result<()> {
        let Some(main) = step.args.last() else {
            return Ok(());
        };
        let stem = Path::new(main)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| main.clone());
        let dest = handle.workspace.join(&step.workdir).join(format!("{stem}.pdf"));
        match &self.artifact_link {
            Some(target) => link(target, &dest),
            None => std::fs::write(dest, FAKE_PDF),
        }
    }
}

#[cfg(unix)]
fn link(target: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.symlink_metadata().is_ok() {
        std::fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn link(target: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::copy(target, dest).map(|_| ())
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self, spec: &ContainerSpec, limit: Duration) -> RuntimeResult<ContainerHandle> {
        if let Some(reason) = &self.unavailable {
            return Err(RuntimeError::Unavailable(reason.clone()));
        }
        if self.start_times_out {
            return Err(RuntimeError::TimedOut(limit.as_millis() as u64));
        }
        if self.image_missing {
            return Err(RuntimeError::ImageMissing(spec.image.clone()));
        }
        if let Some(reason) = &self.fail_start {
            return Err(RuntimeError::Failed(reason.clone()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec.name.clone());
        Ok(ContainerHandle {
            name: spec.name.clone(),
            workspace: spec.workspace.clone(),
        })
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        step: &ShellStep,
        limit: Duration,
    ) -> RuntimeResult<ExecOutput> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(step.clone());

        if self.hang_on == Some(step.kind) {
            tokio::time::sleep(limit).await;
            return Ok(ExecOutput {
                exit_code: None,
                stdout: format!("{} started\n", step.program),
                stderr: String::new(),
                timed_out: true,
                duration_ms: limit.as_millis() as u64,
            });
        }

        let script = self.scripts.get(&step.kind).cloned().unwrap_or_default();
        if step.kind.is_engine_pass() && !self.without_artifact {
            self.write_artifact(handle, step)?;
        }
        Ok(ExecOutput {
            exit_code: Some(script.exit_code),
            stdout: script.stdout,
            stderr: script.stderr,
            timed_out: false,
            duration_ms: 1,
        })
    }

    async fn remove(&self, name: &str) -> RuntimeResult<()> {
        self.forget(name);
        Ok(())
    }

    fn remove_blocking(&self, name: &str) {
        self.forget(name);
    }

    async fn ping(&self, _limit: Duration) -> RuntimeResult<String> {
        match &self.unavailable {
            Some(reason) => Err(RuntimeError::Unavailable(reason.clone())),
            None => Ok("scripted-1.0".to_string()),
        }
    }

    async fn image_present(&self, _image: &str, _limit: Duration) -> RuntimeResult<bool> {
        self.image_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.unavailable {
            return Err(RuntimeError::Unavailable(reason.clone()));
        }
        Ok(!self.image_missing)
    }
}
