//! Boundary to the device automation driver.
//!
//! Everything the engine does on a device goes through [`Driver`]. The engine
//! awaits one driver call at a time; implementations do not need to support
//! concurrent use from the same session.

use crate::error::{DriverError, DriverResult};
use crate::geometry::{Point, Rect, ViewportSize};
use crate::locator::QueryExpression;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque reference to an element resolved by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A platform-native script command such as `mobile: scrollGesture`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileCommand {
    pub script: String,
    pub args: Value,
}

/// A single-finger pointer gesture from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwipePath {
    pub start: Point,
    pub end: Point,
    pub duration_ms: u64,
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn query_element(&self, query: &QueryExpression) -> DriverResult<ElementHandle>;

    async fn query_elements(&self, query: &QueryExpression) -> DriverResult<Vec<ElementHandle>>;

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool>;

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool>;

    async fn is_clickable(&self, element: &ElementHandle) -> DriverResult<bool>;

    async fn click(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn set_value(&self, element: &ElementHandle, value: &str) -> DriverResult<()>;

    async fn get_text(&self, element: &ElementHandle) -> DriverResult<String>;

    async fn get_location(&self, element: &ElementHandle) -> DriverResult<Point>;

    async fn get_size(&self, element: &ElementHandle) -> DriverResult<(f64, f64)>;

    async fn get_accessibility_tree(&self) -> DriverResult<String>;

    async fn get_viewport_size(&self) -> DriverResult<ViewportSize>;

    async fn tap(&self, point: Point) -> DriverResult<()>;

    async fn swipe(&self, path: &SwipePath) -> DriverResult<()>;

    async fn take_screenshot(&self) -> DriverResult<Vec<u8>>;

    async fn execute_mobile(&self, command: &MobileCommand) -> DriverResult<Value>;

    async fn current_activity(&self) -> DriverResult<String> {
        Err(DriverError::Unsupported("current_activity".to_string()))
    }

    async fn current_package(&self) -> DriverResult<String> {
        Err(DriverError::Unsupported("current_package".to_string()))
    }

    async fn orientation(&self) -> DriverResult<String> {
        Err(DriverError::Unsupported("orientation".to_string()))
    }

    /// Cheap liveness probe used by the session keepalive.
    async fn ping(&self) -> DriverResult<()> {
        self.get_viewport_size().await.map(|_| ())
    }

    async fn element_rect(&self, element: &ElementHandle) -> DriverResult<Rect> {
        let location = self.get_location(element).await?;
        let (width, height) = self.get_size(element).await?;
        Ok(Rect::new(location.x, location.y, width, height))
    }
}
