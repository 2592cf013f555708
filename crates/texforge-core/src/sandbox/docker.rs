//! Docker/Podman CLI runtime.
//!
//! Each build gets one long-lived container (`sleep infinity`) with no
//! network, dropped capabilities and resource limits. Steps run through
//! `exec` as plain argv, so nothing passes through a shell.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{indicates_daemon_down, indicates_image_missing, RuntimeError, RuntimeResult};
use super::runtime::{ContainerHandle, ContainerSpec, ExecOutput, SandboxRuntime, CONTAINER_WORKDIR};
use crate::planner::ShellStep;

/// Runtime driven through the `docker` (or compatible) command-line client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Captured output of a runtime CLI invocation.
struct CliOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CliOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `run`, excluding the binary.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            spec.name.clone(),
            "--network".into(),
            "none".into(),
            "--memory".into(),
            spec.memory_limit.clone(),
            "--cpus".into(),
            spec.cpu_limit.clone(),
            "--pids-limit".into(),
            spec.pids_limit.to_string(),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--tmpfs".into(),
            "/tmp:rw,exec".into(),
            "--env".into(),
            "HOME=/tmp".into(),
            "--pull".into(),
            spec.pull_policy.as_flag().into(),
            "-v".into(),
            format!("{}:{}", spec.workspace.display(), CONTAINER_WORKDIR),
            "-w".into(),
            CONTAINER_WORKDIR.into(),
        ];
        if let Some(user) = &spec.user {
            args.push("--user".into());
            args.push(user.clone());
        }
        args.push(spec.image.clone());
        args.push("sleep".into());
        args.push("infinity".into());
        args
    }

    /// Arguments for `exec`, excluding the binary.
    pub fn exec_args(handle: &ContainerHandle, step: &ShellStep) -> Vec<String> {
        let workdir = if step.workdir.is_empty() {
            CONTAINER_WORKDIR.to_string()
        } else {
            format!("{}/{}", CONTAINER_WORKDIR, step.workdir)
        };
        let mut args = vec!["exec".to_string(), "-w".to_string(), workdir, handle.name.clone()];
        args.extend(step.argv());
        args
    }

    fn spawn_error(&self, err: std::io::Error) -> RuntimeError {
        if err.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::Unavailable(format!("{} not found in PATH", self.binary))
        } else {
            RuntimeError::Io(err)
        }
    }

    /// Run the CLI, killing it if `limit` elapses. Output read so far is kept.
    async fn run_cli(&self, args: &[String], limit: Duration) -> RuntimeResult<(CliOutput, bool)> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let (code, timed_out) = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out runtime process");
                }
                (None, true)
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok((
            CliOutput {
                code,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            },
            timed_out,
        ))
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn start(&self, spec: &ContainerSpec, limit: Duration) -> RuntimeResult<ContainerHandle> {
        debug!(container = %spec.name, image = %spec.image, "starting build container");
        let (out, timed_out) = self.run_cli(&Self::run_args(spec), limit).await?;
        if timed_out {
            return Err(RuntimeError::TimedOut(limit.as_millis() as u64));
        }
        if !out.success() {
            let stderr = out.stderr.trim().to_string();
            return Err(if indicates_daemon_down(&stderr) {
                RuntimeError::Unavailable(stderr)
            } else if indicates_image_missing(&stderr) {
                RuntimeError::ImageMissing(spec.image.clone())
            } else {
                RuntimeError::Failed(stderr)
            });
        }
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
        let started = Instant::now();
        let (out, timed_out) = self.run_cli(&Self::exec_args(handle, step), limit).await?;
        if !timed_out && out.code != Some(0) && indicates_daemon_down(&out.stderr) {
            return Err(RuntimeError::Unavailable(out.stderr.trim().to_string()));
        }
        Ok(ExecOutput {
            exit_code: out.code,
            stdout: out.stdout,
            stderr: out.stderr,
            timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn remove(&self, name: &str) -> RuntimeResult<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        let (out, timed_out) = self.run_cli(&args, Duration::from_secs(30)).await?;
        if timed_out {
            return Err(RuntimeError::TimedOut(30_000));
        }
        if !out.success() && !out.stderr.to_ascii_lowercase().contains("no such container") {
            return Err(RuntimeError::Failed(out.stderr.trim().to_string()));
        }
        debug!(container = %name, "build container removed");
        Ok(())
    }

    fn remove_blocking(&self, name: &str) {
        let result = std::process::Command::new(&self.binary)
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = result {
            warn!(container = %name, error = %e, "blocking container removal failed");
        }
    }

    async fn ping(&self, limit: Duration) -> RuntimeResult<String> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let (out, timed_out) = self.run_cli(&args, limit).await?;
        if timed_out {
            return Err(RuntimeError::Unavailable(format!(
                "{} did not respond within {}ms",
                self.binary,
                limit.as_millis()
            )));
        }
        if !out.success() {
            let stderr = out.stderr.trim();
            return Err(RuntimeError::Unavailable(if stderr.is_empty() {
                format!("{} daemon is not reachable", self.binary)
            } else {
                stderr.to_string()
            }));
        }
        Ok(out.stdout.trim().to_string())
    }

    async fn image_present(&self, image: &str, limit: Duration) -> RuntimeResult<bool> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            image.to_string(),
        ];
        let (out, timed_out) = self.run_cli(&args, limit).await?;
        if timed_out {
            return Err(RuntimeError::TimedOut(limit.as_millis() as u64));
        }
        if out.success() {
            return Ok(true);
        }
        if indicates_daemon_down(&out.stderr) {
            return Err(RuntimeError::Unavailable(out.stderr.trim().to_string()));
        }
        if indicates_image_missing(&out.stderr) {
            return Ok(false);
        }
        Err(RuntimeError::Failed(out.stderr.trim().to_string()))
    }
}
