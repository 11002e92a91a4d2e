use crate::driver::{MobileCommand, SwipePath};
use crate::geometry::{Direction, Point, Rect};
use crate::locator::{QueryExpression, Strategy, xpath_literal};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Android,
    #[serde(rename = "iOS")]
    Ios,
}

impl Platform {
    pub fn dialect(&self) -> &'static dyn PlatformDialect {
        match self {
            Platform::Android => &AndroidDialect,
            Platform::Ios => &IosDialect,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android => f.write_str("Android"),
            Platform::Ios => f.write_str("iOS"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Platform chosen for a session. Fixed once the session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContext {
    platform: Platform,
}

impl PlatformContext {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn dialect(&self) -> &'static dyn PlatformDialect {
        self.platform.dialect()
    }
}

/// Whether a query should resolve one element or enumerate many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Many,
}

/// Platform-specific query and gesture dialect.
pub trait PlatformDialect: Send + Sync {
    fn platform(&self) -> Platform;

    fn supports(&self, strategy: Strategy) -> bool;

    fn translate_text(&self, selector: &str, cardinality: Cardinality) -> QueryExpression;

    fn translate_content_description(&self, selector: &str) -> QueryExpression;

    /// Native scroll script for `area`, preferred over a raw swipe.
    fn build_scroll_command(
        &self,
        area: &Rect,
        direction: Direction,
        percent: f64,
        element_hint: Option<&str>,
    ) -> MobileCommand;

    /// Pointer swipe revealing content in `direction`.
    fn build_swipe_command(
        &self,
        area: &Rect,
        direction: Direction,
        distance: f64,
        duration_ms: u64,
    ) -> SwipePath;
}

pub struct AndroidDialect;

impl PlatformDialect for AndroidDialect {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    fn supports(&self, strategy: Strategy) -> bool {
        !matches!(
            strategy,
            Strategy::PlatformClassChain | Strategy::PlatformPredicate
        )
    }

    fn translate_text(&self, selector: &str, cardinality: Cardinality) -> QueryExpression {
        let literal = xpath_literal(selector);
        match cardinality {
            Cardinality::Single => QueryExpression::XPath(format!("//*[@text={}]", literal)),
            // Enumeration casts a wider net than single lookups.
            Cardinality::Many => QueryExpression::XPath(format!(
                "//*[@text={0} or @content-desc={0}]",
                literal
            )),
        }
    }

    fn translate_content_description(&self, selector: &str) -> QueryExpression {
        QueryExpression::XPath(format!("//*[@content-desc={}]", xpath_literal(selector)))
    }

    fn build_scroll_command(
        &self,
        area: &Rect,
        direction: Direction,
        percent: f64,
        _element_hint: Option<&str>,
    ) -> MobileCommand {
        MobileCommand {
            script: "mobile: scrollGesture".to_string(),
            args: json!({
                "left": area.x.round(),
                "top": area.y.round(),
                "width": area.width.round(),
                "height": area.height.round(),
                "direction": direction.as_str(),
                "percent": percent,
            }),
        }
    }

    fn build_swipe_command(
        &self,
        area: &Rect,
        direction: Direction,
        distance: f64,
        duration_ms: u64,
    ) -> SwipePath {
        finger_path(area, direction, distance, duration_ms)
    }
}

pub struct IosDialect;

impl PlatformDialect for IosDialect {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    fn supports(&self, _strategy: Strategy) -> bool {
        true
    }

    fn translate_text(&self, selector: &str, _cardinality: Cardinality) -> QueryExpression {
        // XCUITest exposes the visible text as label, name or value depending
        // on the control type.
        QueryExpression::XPath(format!(
            "//*[@label={0} or @name={0} or @value={0}]",
            xpath_literal(selector)
        ))
    }

    fn translate_content_description(&self, selector: &str) -> QueryExpression {
        QueryExpression::XPath(format!(
            "//*[@label={0} or @name={0}]",
            xpath_literal(selector)
        ))
    }

    fn build_scroll_command(
        &self,
        _area: &Rect,
        direction: Direction,
        _percent: f64,
        element_hint: Option<&str>,
    ) -> MobileCommand {
        let mut args = json!({ "direction": direction.as_str() });
        if let Some(hint) = element_hint {
            args["elementId"] = json!(hint);
        }
        MobileCommand {
            script: "mobile: scroll".to_string(),
            args,
        }
    }

    fn build_swipe_command(
        &self,
        area: &Rect,
        direction: Direction,
        distance: f64,
        duration_ms: u64,
    ) -> SwipePath {
        finger_path(area, direction, distance, duration_ms)
    }
}

/// Finger travel is the inverse of the content direction: revealing content
/// below means dragging from the lower half toward the upper half.
fn finger_path(area: &Rect, direction: Direction, distance: f64, duration_ms: u64) -> SwipePath {
    let center = area.center();
    let span = if direction.is_vertical() {
        area.height
    } else {
        area.width
    };
    let half = distance.min(span).max(0.0) / 2.0;

    let (start, end) = match direction {
        Direction::Down => (
            Point::new(center.x, center.y + half),
            Point::new(center.x, center.y - half),
        ),
        Direction::Up => (
            Point::new(center.x, center.y - half),
            Point::new(center.x, center.y + half),
        ),
        Direction::Right => (
            Point::new(center.x + half, center.y),
            Point::new(center.x - half, center.y),
        ),
        Direction::Left => (
            Point::new(center.x - half, center.y),
            Point::new(center.x + half, center.y),
        ),
    };

    SwipePath {
        start: area.clamp_point(start),
        end: area.clamp_point(end),
        duration_ms,
    }
}
