//! Sandbox runtime and toolchain image availability, outside of any build.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sandbox::{RuntimeError, SandboxConfig, SandboxRuntime};

/// Explicit, invalidatable cache of image-presence answers.
///
/// Only positive answers are stored, so an image pulled after a negative
/// probe is seen on the next call.
#[derive(Debug)]
pub struct ImagePresenceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl ImagePresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `Some(true)` while a positive answer is fresh, `None` otherwise.
    pub fn get(&self, image: &str) -> Option<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(image) {
            Some(stored) if stored.elapsed() < self.ttl => Some(true),
            Some(_) => {
                entries.remove(image);
                None
            }
            None => None,
        }
    }

    pub fn store(&self, image: &str, present: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if present {
            entries.insert(image.to_string(), Instant::now());
        } else {
            entries.remove(image);
        }
    }

    pub fn invalidate(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Result of a status probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub runtime_up: bool,
    pub toolchain_image_present: bool,
    pub toolchain_image_name: String,
    pub probe_message: String,
}

/// Reports whether builds can run right now.
pub struct StatusProbe {
    runtime: Arc<dyn SandboxRuntime>,
    image: String,
    timeout: Duration,
    cache: Arc<ImagePresenceCache>,
}

impl StatusProbe {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: &SandboxConfig) -> Self {
        Self {
            runtime,
            image: config.image.clone(),
            timeout: config.probe_timeout(),
            cache: Arc::new(ImagePresenceCache::new(config.image_cache_ttl())),
        }
    }

    /// Share an existing cache (e.g. one owned by a long-running service).
    pub fn with_cache(mut self, cache: Arc<ImagePresenceCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ImagePresenceCache> {
        &self.cache
    }

    /// Check the runtime, then the image. The image check is skipped when the
    /// runtime is down.
    pub async fn probe(&self) -> ProbeReport {
        let mut report = ProbeReport {
            runtime_up: false,
            toolchain_image_present: false,
            toolchain_image_name: self.image.clone(),
            probe_message: String::new(),
        };

        let version = match self.runtime.ping(self.timeout).await {
            Ok(version) => version,
            Err(e) => {
                report.probe_message = format!("container runtime unavailable: {}", reason(&e));
                return report;
            }
        };
        report.runtime_up = true;

        let present = match self.cache.get(&self.image) {
            Some(cached) => {
                debug!(image = %self.image, "image presence served from cache");
                Ok(cached)
            }
            None => self.runtime.image_present(&self.image, self.timeout).await,
        };

        match present {
            Ok(true) => {
                self.cache.store(&self.image, true);
                report.toolchain_image_present = true;
                report.probe_message = format!(
                    "{} {} ready with image {}",
                    self.runtime.name(),
                    version,
                    self.image
                );
            }
            Ok(false) => {
                self.cache.store(&self.image, false);
                report.probe_message = format!(
                    "container runtime is up but image {} is not pulled",
                    self.image
                );
            }
            Err(e) => {
                report.probe_message = format!(
                    "container runtime is up but image {} could not be checked: {}",
                    self.image,
                    reason(&e)
                );
            }
        }
        report
    }
}

fn reason(err: &RuntimeError) -> String {
    match err {
        RuntimeError::Unavailable(msg) | RuntimeError::Failed(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRuntime;

    fn config() -> SandboxConfig {
        SandboxConfig::default().with_image("texlive/texlive:test")
    }

    #[test]
    fn test_cache_stores_only_positive_answers() {
        let cache = ImagePresenceCache::new(Duration::from_secs(60));
        cache.store("img", false);
        assert_eq!(cache.get("img"), None);
        cache.store("img", true);
        assert_eq!(cache.get("img"), Some(true));
        cache.invalidate();
        assert_eq!(cache.get("img"), None);
    }

    #[test]
    fn test_cache_entries_expire() {
        let cache = ImagePresenceCache::new(Duration::ZERO);
        cache.store("img", true);
        assert_eq!(cache.get("img"), None);
    }

    #[tokio::test]
    async fn test_probe_runtime_down_skips_image_check() {
        let runtime = Arc::new(ScriptedRuntime::new().unavailable("Cannot connect to the Docker daemon"));
        let probe = StatusProbe::new(runtime.clone(), &config());
        let report = probe.probe().await;
        assert!(!report.runtime_up);
        assert!(!report.toolchain_image_present);
        assert!(report.probe_message.contains("Cannot connect"));
        assert_eq!(runtime.image_checks(), 0);
    }

    #[tokio::test]
    async fn test_probe_image_missing_has_distinct_message() {
        let runtime = Arc::new(ScriptedRuntime::new().image_missing());
        let report = StatusProbe::new(runtime, &config()).probe().await;
        assert!(report.runtime_up);
        assert!(!report.toolchain_image_present);
        assert_eq!(report.toolchain_image_name, "texlive/texlive:test");
        assert!(report.probe_message.contains("not pulled"));
    }

    #[tokio::test]
    async fn test_probe_caches_positive_image_answer() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let probe = StatusProbe::new(runtime.clone(), &config());
        assert!(probe.probe().await.toolchain_image_present);
        assert!(probe.probe().await.toolchain_image_present);
        assert_eq!(runtime.image_checks(), 1);

        probe.cache().invalidate();
        probe.probe().await;
        assert_eq!(runtime.image_checks(), 2);
    }

    #[test]
    fn test_report_wire_names() {
        let report = ProbeReport {
            runtime_up: true,
            toolchain_image_present: false,
            toolchain_image_name: "img".into(),
            probe_message: "m".into(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["runtimeUp"], true);
        assert_eq!(json["toolchainImagePresent"], false);
        assert_eq!(json["toolchainImageName"], "img");
    }
}
