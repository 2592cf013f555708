//! Sandbox configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default toolchain image bundling the engines and auxiliary tools.
pub const DEFAULT_IMAGE: &str = "texlive/texlive:latest";

/// Whether the runtime may pull a missing toolchain image at build time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    #[default]
    Missing,
    Never,
}

impl PullPolicy {
    pub fn as_flag(&self) -> &'static str {
        match self {
            PullPolicy::Missing => "missing",
            PullPolicy::Never => "never",
        }
    }
}

impl std::str::FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "missing" => Ok(PullPolicy::Missing),
            "never" => Ok(PullPolicy::Never),
            other => Err(format!("unknown pull policy: {other}")),
        }
    }
}

/// Configuration for the isolated build environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    /// Container runtime CLI (`docker`, `podman`).
    pub runtime_binary: String,

    /// Toolchain image.
    pub image: String,

    /// Directory under which per-build workspaces are created.
    pub workspace_root: PathBuf,

    /// Container memory limit (runtime syntax, e.g. `2g`).
    pub memory_limit: String,

    /// Container CPU limit (e.g. `2`).
    pub cpu_limit: String,

    pub pids_limit: u32,

    pub pull_policy: PullPolicy,

    /// Timeout for status probes, independent of the build timeout.
    pub probe_timeout_ms: u64,

    /// How long a positive image-presence answer stays cached.
    pub image_cache_ttl_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            runtime_binary: std::env::var("TEXFORGE_RUNTIME").unwrap_or_else(|_| "docker".to_string()),
            image: std::env::var("TEXFORGE_IMAGE").unwrap_or_else(|_| DEFAULT_IMAGE.to_string()),
            workspace_root: std::env::var("TEXFORGE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            memory_limit: std::env::var("TEXFORGE_MEMORY_LIMIT").unwrap_or_else(|_| "2g".to_string()),
            cpu_limit: std::env::var("TEXFORGE_CPU_LIMIT").unwrap_or_else(|_| "2".to_string()),
            pids_limit: 512,
            pull_policy: std::env::var("TEXFORGE_PULL_POLICY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_default(),
            probe_timeout_ms: 5_000,
            image_cache_ttl_secs: 60,
        }
    }
}

impl SandboxConfig {
    /// Create a config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_runtime_binary(mut self, binary: impl Into<String>) -> Self {
        self.runtime_binary = binary.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn with_probe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn image_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.image_cache_ttl_secs)
    }
}
