use crate::config::CaptureConfig;
use crate::driver::Driver;
use crate::error::{EngineError, Result};
use crate::geometry::ViewportSize;
use crate::platform::{Platform, PlatformContext};
use crate::storage::{Artifact, ArtifactStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

const SCREENSHOT_FILE: &str = "screenshot.png";
const TREE_FILE: &str = "tree.xml";

/// Foreground app state. Android reports activity and package, iOS the
/// interface orientation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppContext {
    pub activity: Option<String>,
    pub package: Option<String>,
    pub orientation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: String,
    pub timestamp_ms: i64,
    pub action_name: String,
    pub params: Value,
    pub platform: Platform,
    /// `None` when the screenshot could not be taken or stored.
    pub screenshot_ref: Option<PathBuf>,
    pub tree_ref: Option<PathBuf>,
    pub viewport: Option<ViewportSize>,
    pub app_context: AppContext,
    pub created_at: DateTime<Utc>,
}

/// Result of an action wrapped by [`StateCaptureRing::with_capture`].
#[derive(Debug, Clone)]
pub struct Captured<T> {
    pub value: T,
    pub before: CaptureRecord,
    pub after: CaptureRecord,
}

/// Fixed-capacity capture history. Evicted records leave their artifacts
/// in storage.
pub struct StateCaptureRing {
    driver: Arc<dyn Driver>,
    store: Arc<dyn ArtifactStore>,
    platform: PlatformContext,
    config: CaptureConfig,
    records: Mutex<VecDeque<CaptureRecord>>,
    app_context: Mutex<AppContext>,
}

impl StateCaptureRing {
    pub fn new(
        driver: Arc<dyn Driver>,
        store: Arc<dyn ArtifactStore>,
        platform: PlatformContext,
        config: CaptureConfig,
    ) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            driver,
            store,
            platform,
            config,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            app_context: Mutex::new(AppContext::default()),
        }
    }

    fn ring(&self) -> MutexGuard<'_, VecDeque<CaptureRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }

    /// Snapshots the screen and tree around `action_name`. Individual
    /// artifact failures are logged and leave the matching field empty.
    pub async fn capture(&self, action_name: &str, params: Value) -> CaptureRecord {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let dir = self.config.artifact_dir.join(&id);

        let screenshot_ref = match self.driver.take_screenshot().await {
            Ok(bytes) => {
                self.store_artifact(dir.join(SCREENSHOT_FILE), Artifact::Bytes(bytes))
                    .await
            }
            Err(e) => {
                warn!(action = action_name, error = %e, "screenshot capture failed");
                None
            }
        };

        let tree_ref = match self.driver.get_accessibility_tree().await {
            Ok(tree) => self.store_artifact(dir.join(TREE_FILE), Artifact::Text(tree)).await,
            Err(e) => {
                warn!(action = action_name, error = %e, "tree capture failed");
                None
            }
        };

        let viewport = match self.driver.get_viewport_size().await {
            Ok(viewport) => Some(viewport),
            Err(e) => {
                warn!(action = action_name, error = %e, "viewport unavailable during capture");
                None
            }
        };

        let app_context = self.refresh_app_context().await;

        let record = CaptureRecord {
            id,
            timestamp_ms: created_at.timestamp_millis(),
            action_name: action_name.to_string(),
            params,
            platform: self.platform.platform(),
            screenshot_ref,
            tree_ref,
            viewport,
            app_context,
            created_at,
        };

        let mut ring = self.ring();
        while ring.len() >= self.capacity() {
            if let Some(evicted) = ring.pop_front() {
                debug!(id = %evicted.id, action = %evicted.action_name, "evicted capture record");
            }
        }
        ring.push_back(record.clone());
        debug!(id = %record.id, action = action_name, size = ring.len(), "captured state");
        record
    }

    /// Captures before and after `action`. The after snapshot is taken even
    /// when the action fails, then the failure is returned.
    pub async fn with_capture<T, F, Fut>(
        &self,
        action_name: &str,
        params: Value,
        action: F,
    ) -> Result<Captured<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let before = self
            .capture(&format!("{}:before", action_name), params.clone())
            .await;
        let result = action().await;
        let after = self.capture(&format!("{}:after", action_name), params).await;
        let value = result?;
        Ok(Captured {
            value,
            before,
            after,
        })
    }

    async fn store_artifact(&self, path: PathBuf, artifact: Artifact) -> Option<PathBuf> {
        match self.store.write_artifact(&path, &artifact).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to store capture artifact");
                None
            }
        }
    }

    async fn refresh_app_context(&self) -> AppContext {
        let context = match self.platform.platform() {
            Platform::Android => AppContext {
                activity: self.driver.current_activity().await.ok(),
                package: self.driver.current_package().await.ok(),
                orientation: None,
            },
            Platform::Ios => AppContext {
                activity: None,
                package: None,
                orientation: self.driver.orientation().await.ok(),
            },
        };
        *self.app_context.lock().unwrap_or_else(|e| e.into_inner()) = context.clone();
        context
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<CaptureRecord> {
        self.ring().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<CaptureRecord> {
        self.ring().back().cloned()
    }

    pub fn get(&self, id: &str) -> Option<CaptureRecord> {
        self.ring().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    /// App context from the most recent capture.
    pub fn app_context(&self) -> AppContext {
        self.app_context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forgets the history. Stored artifacts are kept.
    pub fn clear(&self) {
        self.ring().clear();
    }

    pub async fn read_screenshot(&self, record: &CaptureRecord) -> Result<Vec<u8>> {
        let path = artifact_ref(record.screenshot_ref.as_deref(), "screenshot", &record.id)?;
        Ok(self.store.read_artifact(path, false).await?.as_bytes().to_vec())
    }

    pub async fn read_tree(&self, record: &CaptureRecord) -> Result<String> {
        let path = artifact_ref(record.tree_ref.as_deref(), "tree", &record.id)?;
        match self.store.read_artifact(path, true).await? {
            Artifact::Text(tree) => Ok(tree),
            Artifact::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|e| EngineError::Storage(format!("tree artifact is not UTF-8: {}", e))),
        }
    }
}

fn artifact_ref<'a>(path: Option<&'a Path>, kind: &str, id: &str) -> Result<&'a Path> {
    path.ok_or_else(|| EngineError::Storage(format!("capture {} has no {} artifact", id, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use crate::storage::{FsArtifactStore, MemoryArtifactStore};
    use serde_json::json;
    use tempfile::TempDir;

    const TREE: &str = r#"<hierarchy><android.widget.Button resource-id="ok" text="OK"/></hierarchy>"#;

    fn ring(
        driver: Arc<MockDriver>,
        store: Arc<dyn ArtifactStore>,
        platform: Platform,
    ) -> StateCaptureRing {
        StateCaptureRing::new(
            driver,
            store,
            PlatformContext::new(platform),
            CaptureConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest_and_keeps_files() {
        let driver = Arc::new(MockDriver::with_tree(TREE));
        let store = Arc::new(MemoryArtifactStore::new());
        let ring = ring(driver, store.clone(), Platform::Android);

        let mut ids = Vec::new();
        for i in 0..7 {
            ids.push(ring.capture(&format!("tap_{}", i), json!({ "i": i })).await.id);
        }

        assert_eq!(ring.len(), 5);
        let kept: Vec<String> = ring.records().into_iter().map(|r| r.id).collect();
        assert_eq!(kept, ids[2..].to_vec());
        assert!(ring.get(&ids[0]).is_none());
        assert_eq!(ring.latest().unwrap().action_name, "tap_6");
        // two artifacts per capture, none deleted on eviction
        assert_eq!(store.len(), 14);
    }

    #[tokio::test]
    async fn test_artifact_failures_degrade_fields() {
        let driver = Arc::new(MockDriver::with_tree(TREE));
        driver.fail_screenshot(true);
        driver.set_viewport(None);
        let ring = ring(driver.clone(), Arc::new(MemoryArtifactStore::new()), Platform::Android);

        let record = ring.capture("swipe", Value::Null).await;
        assert!(record.screenshot_ref.is_none());
        assert!(record.tree_ref.is_some());
        assert!(record.viewport.is_none());

        driver.fail_tree(true);
        let record = ring.capture("swipe", Value::Null).await;
        assert!(record.tree_ref.is_none());
        assert_eq!(ring.len(), 2);
    }

    #[tokio::test]
    async fn test_app_context_per_platform() {
        let driver = Arc::new(MockDriver::with_tree(TREE));
        driver.set_app_context(Some(".MainActivity"), Some("com.app"), Some("PORTRAIT"));

        let android = ring(driver.clone(), Arc::new(MemoryArtifactStore::new()), Platform::Android);
        let record = android.capture("launch", Value::Null).await;
        assert_eq!(record.app_context.activity.as_deref(), Some(".MainActivity"));
        assert_eq!(record.app_context.package.as_deref(), Some("com.app"));
        assert!(record.app_context.orientation.is_none());
        assert_eq!(android.app_context(), record.app_context);

        let ios = ring(driver, Arc::new(MemoryArtifactStore::new()), Platform::Ios);
        let record = ios.capture("launch", Value::Null).await;
        assert_eq!(record.app_context.orientation.as_deref(), Some("PORTRAIT"));
        assert!(record.app_context.activity.is_none());
    }

    #[tokio::test]
    async fn test_filesystem_round_trip() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let driver = Arc::new(MockDriver::with_tree(TREE));
        let screenshot = vec![0x89, b'P', b'N', b'G', 0x00, 0xff, 0x10];
        driver.set_screenshot(screenshot.clone());
        let store = Arc::new(FsArtifactStore::new(temp_dir.path()));
        let ring = ring(driver, store, Platform::Android);

        let record = ring.capture("login", json!({ "user": "demo" })).await;
        assert_eq!(ring.read_screenshot(&record).await?, screenshot);
        assert_eq!(ring.read_tree(&record).await?, TREE);
        assert!(
            temp_dir
                .path()
                .join("captures")
                .join(&record.id)
                .join("tree.xml")
                .exists()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_with_capture_wraps_action() {
        let driver = Arc::new(MockDriver::with_tree(TREE));
        let ring = ring(driver, Arc::new(MemoryArtifactStore::new()), Platform::Android);

        let captured = ring
            .with_capture("sum", json!({ "a": 1 }), || async { Ok(1 + 1) })
            .await
            .unwrap();
        assert_eq!(captured.value, 2);
        assert_eq!(captured.before.action_name, "sum:before");
        assert_eq!(captured.after.action_name, "sum:after");

        let err = ring
            .with_capture("boom", Value::Null, || async {
                Err::<(), _>(EngineError::ElementNotFound("x".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ElementNotFound(_)));
        assert_eq!(ring.latest().unwrap().action_name, "boom:after");
        assert_eq!(ring.len(), 4);
    }

    #[tokio::test]
    async fn test_clear_keeps_artifacts() {
        let driver = Arc::new(MockDriver::with_tree(TREE));
        let store = Arc::new(MemoryArtifactStore::new());
        let ring = ring(driver, store.clone(), Platform::Android);
        ring.capture("a", Value::Null).await;
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(store.len(), 2);
    }
}
