//! Automation session lifecycle.
//!
//! A [`Session`] owns the connection to one device driver. Components built
//! from it talk to the driver through a gate that admits one driver call at a
//! time and records activity, so the keepalive task only pings an idle
//! session and never interleaves with real work. `reconnect` swaps the
//! underlying driver without invalidating components already handed out.

use crate::capture::StateCaptureRing;
use crate::config::EngineConfig;
use crate::driver::{Driver, ElementHandle, MobileCommand, SwipePath};
use crate::error::{DriverError, DriverResult, EngineError, Result};
use crate::finder::ElementFinder;
use crate::geometry::{Point, Rect, ViewportSize};
use crate::locator::QueryExpression;
use crate::orchestrator::FindAndClickOrchestrator;
use crate::platform::PlatformContext;
use crate::storage::ArtifactStore;
use crate::verify::VerificationEngine;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Establishes driver connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Driver>>;
}

struct SessionShared {
    /// Current driver. Holding the lock is holding the operation gate.
    gate: AsyncMutex<Option<Arc<dyn Driver>>>,
    last_activity: Mutex<Instant>,
}

impl SessionShared {
    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

struct Lease<'a> {
    _gate: AsyncMutexGuard<'a, Option<Arc<dyn Driver>>>,
    driver: Arc<dyn Driver>,
}

/// Driver handed to components: serialises calls and records activity.
struct GatedDriver {
    shared: Arc<SessionShared>,
}

impl GatedDriver {
    async fn lease(&self) -> DriverResult<Lease<'_>> {
        let gate = self.shared.gate.lock().await;
        let driver = gate
            .as_ref()
            .cloned()
            .ok_or_else(|| DriverError::Session("session is not connected".to_string()))?;
        self.shared.touch();
        Ok(Lease {
            _gate: gate,
            driver,
        })
    }
}

#[async_trait]
impl Driver for GatedDriver {
    async fn query_element(&self, query: &QueryExpression) -> DriverResult<ElementHandle> {
        let lease = self.lease().await?;
        lease.driver.query_element(query).await
    }

    async fn query_elements(&self, query: &QueryExpression) -> DriverResult<Vec<ElementHandle>> {
        let lease = self.lease().await?;
        lease.driver.query_elements(query).await
    }

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool> {
        let lease = self.lease().await?;
        lease.driver.is_displayed(element).await
    }

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool> {
        let lease = self.lease().await?;
        lease.driver.is_enabled(element).await
    }

    async fn is_clickable(&self, element: &ElementHandle) -> DriverResult<bool> {
        let lease = self.lease().await?;
        lease.driver.is_clickable(element).await
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        let lease = self.lease().await?;
        lease.driver.click(element).await
    }

    async fn set_value(&self, element: &ElementHandle, value: &str) -> DriverResult<()> {
        let lease = self.lease().await?;
        lease.driver.set_value(element, value).await
    }

    async fn get_text(&self, element: &ElementHandle) -> DriverResult<String> {
        let lease = self.lease().await?;
        lease.driver.get_text(element).await
    }

    async fn get_location(&self, element: &ElementHandle) -> DriverResult<Point> {
        let lease = self.lease().await?;
        lease.driver.get_location(element).await
    }

    async fn get_size(&self, element: &ElementHandle) -> DriverResult<(f64, f64)> {
        let lease = self.lease().await?;
        lease.driver.get_size(element).await
    }

    async fn get_accessibility_tree(&self) -> DriverResult<String> {
        let lease = self.lease().await?;
        lease.driver.get_accessibility_tree().await
    }

    async fn get_viewport_size(&self) -> DriverResult<ViewportSize> {
        let lease = self.lease().await?;
        lease.driver.get_viewport_size().await
    }

    async fn tap(&self, point: Point) -> DriverResult<()> {
        let lease = self.lease().await?;
        lease.driver.tap(point).await
    }

    async fn swipe(&self, path: &SwipePath) -> DriverResult<()> {
        let lease = self.lease().await?;
        lease.driver.swipe(path).await
    }

    async fn take_screenshot(&self) -> DriverResult<Vec<u8>> {
        let lease = self.lease().await?;
        lease.driver.take_screenshot().await
    }

    async fn execute_mobile(&self, command: &MobileCommand) -> DriverResult<Value> {
        let lease = self.lease().await?;
        lease.driver.execute_mobile(command).await
    }

    async fn current_activity(&self) -> DriverResult<String> {
        let lease = self.lease().await?;
        lease.driver.current_activity().await
    }

    async fn current_package(&self) -> DriverResult<String> {
        let lease = self.lease().await?;
        lease.driver.current_package().await
    }

    async fn orientation(&self) -> DriverResult<String> {
        let lease = self.lease().await?;
        lease.driver.orientation().await
    }

    async fn ping(&self) -> DriverResult<()> {
        let lease = self.lease().await?;
        lease.driver.ping().await
    }

    // One lease for both halves, so nothing slips in between.
    async fn element_rect(&self, element: &ElementHandle) -> DriverResult<Rect> {
        let lease = self.lease().await?;
        lease.driver.element_rect(element).await
    }
}

/// Pings the driver whenever the session has been idle for a full interval.
fn spawn_keepalive(shared: Arc<SessionShared>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if shared.idle_for() < interval {
                continue;
            }
            let gate = shared.gate.lock().await;
            let Some(driver) = gate.as_ref() else {
                continue;
            };
            match driver.ping().await {
                Ok(()) => debug!("keepalive ping"),
                Err(e) => warn!(error = %e, "keepalive ping failed"),
            }
        }
    })
}

pub struct Session {
    connector: Arc<dyn Connector>,
    platform: PlatformContext,
    config: EngineConfig,
    shared: Arc<SessionShared>,
    gated: Arc<dyn Driver>,
    keepalive: Option<JoinHandle<()>>,
}

impl Session {
    pub async fn connect(
        connector: Arc<dyn Connector>,
        platform: PlatformContext,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let driver = connector
            .connect()
            .await
            .map_err(|e| EngineError::Session(format!("connect failed: {}", e)))?;

        let shared = Arc::new(SessionShared {
            gate: AsyncMutex::new(Some(driver)),
            last_activity: Mutex::new(Instant::now()),
        });
        let gated: Arc<dyn Driver> = Arc::new(GatedDriver {
            shared: shared.clone(),
        });

        let mut session = Self {
            connector,
            platform,
            config,
            shared,
            gated,
            keepalive: None,
        };
        session.start_keepalive();
        info!(platform = %platform.platform(), "session connected");
        Ok(session)
    }

    fn start_keepalive(&mut self) {
        self.stop_keepalive();
        let interval = self.config.session.keepalive_interval();
        if interval.is_zero() {
            return;
        }
        self.keepalive = Some(spawn_keepalive(self.shared.clone(), interval));
    }

    fn stop_keepalive(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }

    /// Replaces the driver connection. Components created earlier keep
    /// working against the new connection.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.stop_keepalive();
        let mut gate = self.shared.gate.lock().await;
        *gate = None;
        let driver = self
            .connector
            .connect()
            .await
            .map_err(|e| EngineError::Session(format!("reconnect failed: {}", e)))?;
        *gate = Some(driver);
        drop(gate);

        self.shared.touch();
        self.start_keepalive();
        info!("session reconnected");
        Ok(())
    }

    pub async fn close(&mut self) {
        self.stop_keepalive();
        *self.shared.gate.lock().await = None;
        info!("session closed");
    }

    /// Has a driver and the driver answers.
    pub async fn is_connected(&self) -> bool {
        self.gated.ping().await.is_ok()
    }

    /// Marks the session active without touching the driver.
    pub fn touch(&self) {
        self.shared.touch();
    }

    pub fn idle_for(&self) -> Duration {
        self.shared.idle_for()
    }

    pub fn platform(&self) -> PlatformContext {
        self.platform
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.gated.clone()
    }

    pub fn finder(&self) -> ElementFinder {
        ElementFinder::new(self.driver(), self.platform, self.config.wait.clone())
    }

    pub fn orchestrator(&self) -> FindAndClickOrchestrator {
        FindAndClickOrchestrator::from_config(self.driver(), self.platform, &self.config)
    }

    pub fn verifier(&self) -> VerificationEngine {
        VerificationEngine::from_config(self.driver(), self.platform, &self.config)
    }

    pub fn capture_ring(&self, store: Arc<dyn ArtifactStore>) -> StateCaptureRing {
        StateCaptureRing::new(
            self.driver(),
            store,
            self.platform,
            self.config.capture.clone(),
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::locator::LocatorSpec;
    use crate::mock::{DriverCall, MockDriver};
    use crate::orchestrator::ClickOptions;
    use crate::platform::Platform;
    use std::collections::VecDeque;

    const SCREEN: &str =
        r#"<hierarchy><android.widget.Button resource-id="login_button" enabled="true"/></hierarchy>"#;

    struct ScriptedConnector {
        drivers: Mutex<VecDeque<Arc<MockDriver>>>,
    }

    impl ScriptedConnector {
        fn new(drivers: Vec<Arc<MockDriver>>) -> Arc<Self> {
            Arc::new(Self {
                drivers: Mutex::new(drivers.into()),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Arc<dyn Driver>> {
            let next = self.drivers.lock().unwrap().pop_front();
            match next {
                Some(driver) => Ok(driver),
                None => Err(EngineError::Session("device unreachable".to_string())),
            }
        }
    }

    fn config(keepalive_interval_ms: u64) -> EngineConfig {
        EngineConfig {
            session: SessionConfig {
                keepalive_interval_ms,
                ..SessionConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn pings(driver: &MockDriver) -> usize {
        driver
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Ping))
            .count()
    }

    async fn connect(drivers: Vec<Arc<MockDriver>>, keepalive_ms: u64) -> Result<Session> {
        Session::connect(
            ScriptedConnector::new(drivers),
            PlatformContext::new(Platform::Android),
            config(keepalive_ms),
        )
        .await
    }

    #[tokio::test]
    async fn test_components_work_through_session() -> Result<()> {
        let driver = Arc::new(MockDriver::with_tree(SCREEN));
        let session = connect(vec![driver.clone()], 0).await?;

        session
            .orchestrator()
            .find_and_click(&LocatorSpec::id("login_button"), &ClickOptions::direct_only())
            .await?;
        assert_eq!(driver.clicks().len(), 1);
        assert!(session.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconnect_swaps_driver_for_existing_components() -> Result<()> {
        let first = Arc::new(MockDriver::with_tree(SCREEN));
        let second = Arc::new(MockDriver::with_tree(SCREEN));
        let mut session = connect(vec![first.clone(), second.clone()], 0).await?;
        let finder = session.finder();

        session.reconnect().await?;
        assert!(finder.locate(&LocatorSpec::id("login_button")).await?.is_some());
        assert!(first.calls().is_empty());
        assert!(!second.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_reconnect_leaves_session_disconnected() -> Result<()> {
        let mut session = connect(vec![Arc::new(MockDriver::with_tree(SCREEN))], 0).await?;
        let err = session.reconnect().await.unwrap_err();
        assert!(matches!(err, EngineError::Session(_)));
        assert!(!session.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_disconnects() -> Result<()> {
        let driver = Arc::new(MockDriver::with_tree(SCREEN));
        let mut session = connect(vec![driver], 0).await?;
        let finder = session.finder();

        session.close().await;
        assert!(!session.is_connected().await);
        let err = finder.locate(&LocatorSpec::id("login_button")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Driver {
                source: DriverError::Session(_),
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let err = connect(Vec::new(), 0).await.err().unwrap();
        assert!(err.to_string().contains("connect failed"));
    }

    #[tokio::test]
    async fn test_keepalive_pings_idle_session_until_dropped() -> Result<()> {
        let driver = Arc::new(MockDriver::with_tree(SCREEN));
        let session = connect(vec![driver.clone()], 20).await?;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let before_drop = pings(&driver);
        assert!(before_drop >= 1);

        drop(session);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pings(&driver), before_drop);
        Ok(())
    }

    #[tokio::test]
    async fn test_touch_resets_idle_time() -> Result<()> {
        let session = connect(vec![Arc::new(MockDriver::with_tree(SCREEN))], 0).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.idle_for() >= Duration::from_millis(30));
        session.touch();
        assert!(session.idle_for() < Duration::from_millis(30));
        Ok(())
    }
}
