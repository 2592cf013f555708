//! Build response and distinguished outcomes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::diagnostic::Diagnostic;

/// Normalized result of a build that ran to completion (or was cut short).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub success: bool,

    /// Rendered PDF; omitted in check-only mode and on failure.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_artifact",
        deserialize_with = "deserialize_artifact"
    )]
    pub artifact: Option<Vec<u8>>,

    /// SHA-256 of the artifact, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,

    /// Raw toolchain output, line-split, blank lines removed.
    pub log: Vec<String>,

    pub errors: Vec<Diagnostic>,

    pub warnings: Vec<String>,

    /// Number of steps in the executed plan.
    pub plan_steps: usize,

    pub duration_ms: u64,

    pub completed_at: DateTime<Utc>,
}

impl BuildResponse {
    /// An empty failed response, used as the base for partial results.
    pub fn failed() -> Self {
        Self {
            success: false,
            artifact: None,
            artifact_sha256: None,
            log: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            plan_steps: 0,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    pub fn has_artifact(&self) -> bool {
        self.artifact.as_ref().is_some_and(|a| !a.is_empty())
    }
}

fn serialize_artifact<S: Serializer>(
    artifact: &Option<Vec<u8>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match artifact {
        Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

fn deserialize_artifact<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Vec<u8>>, D::Error> {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
        .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
        .transpose()
}

/// What a build request produced.
///
/// `TimedOut` and `RuntimeUnavailable` are data, not errors: callers must be
/// able to tell "the toolchain had something to say" from "the request could
/// not be serviced".
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// All planned steps ran (or a fatal step stopped the plan).
    Finished(BuildResponse),

    /// The wall-clock budget expired; `response` carries whatever output was captured.
    TimedOut {
        timeout_ms: u64,
        response: BuildResponse,
    },

    /// The container runtime could not be reached.
    RuntimeUnavailable { message: String },
}

impl BuildOutcome {
    /// Whether the build produced a usable result.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Finished(r) if r.success)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BuildOutcome::Finished(r) if r.success => "succeeded",
            BuildOutcome::Finished(_) => "failed",
            BuildOutcome::TimedOut { .. } => "timed_out",
            BuildOutcome::RuntimeUnavailable { .. } => "runtime_unavailable",
        }
    }

    /// The response body, when the build got far enough to have one.
    pub fn response(&self) -> Option<&BuildResponse> {
        match self {
            BuildOutcome::Finished(r) | BuildOutcome::TimedOut { response: r, .. } => Some(r),
            BuildOutcome::RuntimeUnavailable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_serialized_as_base64() {
        let mut response = BuildResponse::failed();
        response.success = true;
        response.artifact = Some(b"%PDF-1.5".to_vec());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["artifact"], "JVBERi0xLjU=");
        assert_eq!(json["success"], true);

        let back: BuildResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.artifact.as_deref(), Some(&b"%PDF-1.5"[..]));
    }

    #[test]
    fn test_missing_artifact_omitted() {
        let json = serde_json::to_value(BuildResponse::failed()).unwrap();
        assert!(json.get("artifact").is_none());
        assert!(json.get("artifactSha256").is_none());
    }

    #[test]
    fn test_outcome_labels() {
        let mut ok = BuildResponse::failed();
        ok.success = true;
        assert!(BuildOutcome::Finished(ok).is_success());
        assert_eq!(
            BuildOutcome::Finished(BuildResponse::failed()).label(),
            "failed"
        );
        let timed_out = BuildOutcome::TimedOut {
            timeout_ms: 10,
            response: BuildResponse::failed(),
        };
        assert!(!timed_out.is_success());
        assert!(timed_out.response().is_some());
        let down = BuildOutcome::RuntimeUnavailable {
            message: "docker not found".into(),
        };
        assert_eq!(down.label(), "runtime_unavailable");
        assert!(down.response().is_none());
    }
}
