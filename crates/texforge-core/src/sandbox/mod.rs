//! Sandbox: isolated execution of compilation plans.
//!
//! Source text is attacker-influenced, so every tool runs inside a
//! network-less, capability-dropped container with the build workspace
//! bind-mounted as its working directory.
//!
//! # Modules
//!
//! - [`config`]: `SandboxConfig`, `PullPolicy`
//! - [`runtime`]: `SandboxRuntime` trait, `ContainerSpec`, `ExecOutput`
//! - [`docker`]: `DockerRuntime` (docker/podman CLI)
//! - [`workspace`]: `Workspace` (scoped scratch directory)
//! - [`executor`]: `SandboxedExecutor`, `ExecutionResult`
//! - [`error`]: `RuntimeError` / `RuntimeResult`

pub mod config;
pub mod docker;
pub mod error;
pub mod executor;
pub mod runtime;
pub mod workspace;

pub use config::{PullPolicy, SandboxConfig, DEFAULT_IMAGE};
pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use executor::{ExecutionResult, SandboxedExecutor, StepOutcome};
pub use runtime::{ContainerHandle, ContainerSpec, ExecOutput, SandboxRuntime, CONTAINER_WORKDIR};
pub use workspace::Workspace;
