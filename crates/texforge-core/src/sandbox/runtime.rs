//! Container runtime abstraction.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::config::{PullPolicy, SandboxConfig};
use super::error::RuntimeResult;
use super::workspace::Workspace;
use crate::planner::ShellStep;

/// Mount point of the workspace inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Everything needed to start one isolated build container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSpec {
    /// Unique container name; also used for cleanup.
    pub name: String,
    pub image: String,
    /// Host directory bind-mounted at [`CONTAINER_WORKDIR`].
    pub workspace: PathBuf,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub pids_limit: u32,
    pub pull_policy: PullPolicy,
    /// `uid:gid` to run as, so files written in the workspace stay removable.
    pub user: Option<String>,
}

impl ContainerSpec {
    pub fn for_workspace(config: &SandboxConfig, workspace: &Workspace) -> Self {
        Self {
            name: format!("texforge-{}", uuid::Uuid::new_v4().simple()),
            image: config.image.clone(),
            workspace: workspace.path().to_path_buf(),
            memory_limit: config.memory_limit.clone(),
            cpu_limit: config.cpu_limit.clone(),
            pids_limit: config.pids_limit,
            pull_policy: config.pull_policy,
            user: workspace.owner(),
        }
    }
}

/// A running build container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub workspace: PathBuf,
}

/// Output of one step executed inside the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The step hit its time limit; output is whatever was buffered.
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Backend that runs build steps in an isolated, network-less container.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Runtime name for logs.
    fn name(&self) -> &str;

    /// Start a container for `spec`. Fails with `TimedOut` if `limit` elapses.
    async fn start(&self, spec: &ContainerSpec, limit: Duration) -> RuntimeResult<ContainerHandle>;

    /// Run one step; never fails on a nonzero exit.
    async fn exec(
        &self,
        handle: &ContainerHandle,
        step: &ShellStep,
        limit: Duration,
    ) -> RuntimeResult<ExecOutput>;

    /// Force-remove a container by name. Removing a missing container is not an error.
    async fn remove(&self, name: &str) -> RuntimeResult<()>;

    /// Synchronous removal used from `Drop` when the async path never ran.
    fn remove_blocking(&self, name: &str);

    /// Check the runtime daemon answers; returns its version string.
    async fn ping(&self, limit: Duration) -> RuntimeResult<String>;

    /// Whether `image` is present locally.
    async fn image_present(&self, image: &str, limit: Duration) -> RuntimeResult<bool>;
}
