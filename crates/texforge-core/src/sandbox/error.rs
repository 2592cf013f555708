//! Error types for the sandbox layer.

/// Errors produced by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Runtime not installed, or its daemon cannot be reached.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("toolchain image not present: {0}")]
    ImageMissing(String),

    #[error("container runtime command failed: {0}")]
    Failed(String),

    #[error("container runtime timed out after {0}ms")]
    TimedOut(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}

/// Result type for sandbox operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Markers the Docker/Podman CLIs print when the daemon cannot be reached.
const DAEMON_DOWN_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
    "permission denied while trying to connect",
    "cannot connect to podman",
    "unable to connect to podman",
];

/// Whether runtime stderr indicates the daemon is unreachable.
pub fn indicates_daemon_down(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    DAEMON_DOWN_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether runtime stderr indicates the image is absent locally.
pub fn indicates_image_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such image") || lower.contains("unable to find image")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_down_detection() {
        assert!(indicates_daemon_down(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"
        ));
        assert!(indicates_daemon_down("error during connect: Get \"http://...\""));
        assert!(!indicates_daemon_down("Error: No such image: texlive/texlive:latest"));
    }

    #[test]
    fn test_image_missing_detection() {
        assert!(indicates_image_missing("Error: No such image: texlive/texlive"));
        assert!(indicates_image_missing("Unable to find image 'tex:1' locally"));
        assert!(!indicates_image_missing("OCI runtime create failed"));
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::Unavailable("docker not found in PATH".into());
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("docker not found"));
        assert!(!RuntimeError::Failed("exit 125".into()).is_unavailable());
    }
}
