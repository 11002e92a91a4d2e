//! Scripted in-memory driver.
//!
//! Queries are evaluated against the current tree fixture, so tests describe
//! screens as XML instead of stubbing individual calls. Scroll gestures
//! advance through a sequence of trees, staying on the last one.

use crate::driver::{Driver, ElementHandle, MobileCommand, SwipePath};
use crate::error::{DriverError, DriverResult};
use crate::geometry::{Point, ViewportSize};
use crate::locator::QueryExpression;
use crate::tree::{RawNode, parse_nodes};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::{Mutex, MutexGuard};

static INDEXED_XPATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(//([\w.*]+)\)\[(\d+)\]$").expect("indexed xpath pattern"));

static SIMPLE_XPATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^//([\w.*]+)(?:\[(.*)\])?$").expect("simple xpath pattern"));

static XPATH_CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@([\w:\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("xpath condition pattern")
});

/// Driver call recorded by [`MockDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Query(QueryExpression),
    Click(String),
    SetValue(String, String),
    Tap(Point),
    Swipe(SwipePath),
    Mobile(MobileCommand),
    Tree,
    Screenshot,
    Ping,
}

#[derive(Debug)]
struct MockState {
    trees: Vec<String>,
    current: usize,
    viewport: Option<ViewportSize>,
    fail_native_scroll: bool,
    fail_swipe: bool,
    click_failures: u32,
    query_session_error: bool,
    state_session_error: bool,
    fail_tree: bool,
    fail_screenshot: bool,
    fail_ping: bool,
    screenshot: Vec<u8>,
    activity: Option<String>,
    package: Option<String>,
    orientation: Option<String>,
    calls: Vec<DriverCall>,
}

#[derive(Debug)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn with_tree(tree: impl Into<String>) -> Self {
        Self::with_trees(vec![tree.into()])
    }

    pub fn with_trees(trees: Vec<String>) -> Self {
        Self {
            state: Mutex::new(MockState {
                trees,
                current: 0,
                viewport: Some(ViewportSize::new(1080, 1920)),
                fail_native_scroll: false,
                fail_swipe: false,
                click_failures: 0,
                query_session_error: false,
                state_session_error: false,
                fail_tree: false,
                fail_screenshot: false,
                fail_ping: false,
                screenshot: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a],
                activity: None,
                package: None,
                orientation: None,
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_tree(&self, tree: impl Into<String>) {
        let mut state = self.state();
        state.trees = vec![tree.into()];
        state.current = 0;
    }

    pub fn set_viewport(&self, viewport: Option<ViewportSize>) {
        self.state().viewport = viewport;
    }

    pub fn fail_native_scroll(&self, fail: bool) {
        self.state().fail_native_scroll = fail;
    }

    pub fn fail_swipes(&self, fail: bool) {
        self.state().fail_swipe = fail;
    }

    pub fn fail_next_clicks(&self, count: u32) {
        self.state().click_failures = count;
    }

    pub fn fail_queries_with_session_error(&self, fail: bool) {
        self.state().query_session_error = fail;
    }

    /// Displayed and enabled checks fail as if the session died.
    pub fn fail_state_checks_with_session_error(&self, fail: bool) {
        self.state().state_session_error = fail;
    }

    pub fn fail_tree(&self, fail: bool) {
        self.state().fail_tree = fail;
    }

    pub fn fail_screenshot(&self, fail: bool) {
        self.state().fail_screenshot = fail;
    }

    pub fn fail_ping(&self, fail: bool) {
        self.state().fail_ping = fail;
    }

    pub fn set_screenshot(&self, bytes: Vec<u8>) {
        self.state().screenshot = bytes;
    }

    pub fn set_app_context(
        &self,
        activity: Option<&str>,
        package: Option<&str>,
        orientation: Option<&str>,
    ) {
        let mut state = self.state();
        state.activity = activity.map(str::to_string);
        state.package = package.map(str::to_string);
        state.orientation = orientation.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    /// Scroll gestures issued, native or pointer.
    pub fn gesture_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::Swipe(_) | DriverCall::Mobile(_)))
            .count()
    }

    pub fn taps(&self) -> Vec<Point> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::Tap(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::Click(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn current_nodes(&self) -> Vec<RawNode> {
        let state = self.state();
        state
            .trees
            .get(state.current)
            .map(|tree| parse_nodes(tree))
            .unwrap_or_default()
    }

    fn node(&self, element: &ElementHandle) -> DriverResult<RawNode> {
        let index = element
            .id
            .strip_prefix("node-")
            .and_then(|i| i.parse::<usize>().ok())
            .ok_or_else(|| DriverError::NoSuchElement(element.id.clone()))?;
        self.current_nodes()
            .into_iter()
            .find(|n| n.index == index)
            .ok_or_else(|| DriverError::NoSuchElement(format!("stale element {}", element.id)))
    }

    fn advance(&self) {
        let mut state = self.state();
        if state.current + 1 < state.trees.len() {
            state.current += 1;
        }
    }

    fn evaluate(&self, query: &QueryExpression) -> DriverResult<Vec<RawNode>> {
        let nodes = self.current_nodes();
        let matches: Vec<RawNode> = match query {
            QueryExpression::Id(id) => nodes
                .into_iter()
                .filter(|n| {
                    n.attr("resource-id").is_some_and(|r| {
                        r == id.as_str()
                            || r.rsplit_once(":id/").is_some_and(|(_, s)| s == id.as_str())
                    }) || n.attr("name") == Some(id.as_str())
                })
                .collect(),
            QueryExpression::AccessibilityId(id) => nodes
                .into_iter()
                .filter(|n| {
                    n.attr("content-desc") == Some(id.as_str())
                        || n.attr("name") == Some(id.as_str())
                })
                .collect(),
            QueryExpression::ClassName(class) => nodes
                .into_iter()
                .filter(|n| n.class_name() == class.as_str())
                .collect(),
            QueryExpression::XPath(xpath) => evaluate_xpath(xpath, nodes)?,
            other => {
                return Err(DriverError::Unsupported(format!(
                    "mock cannot evaluate {}",
                    other.using()
                )));
            }
        };
        Ok(matches)
    }

    fn check_session(&self) -> DriverResult<()> {
        if self.state().state_session_error {
            return Err(DriverError::Session("session terminated".to_string()));
        }
        Ok(())
    }

    fn record(&self, call: DriverCall) {
        self.state().calls.push(call);
    }
}

fn evaluate_xpath(xpath: &str, nodes: Vec<RawNode>) -> DriverResult<Vec<RawNode>> {
    let tag_matches = |node: &RawNode, tag: &str| tag == "*" || node.tag == tag;

    if let Some(caps) = INDEXED_XPATH.captures(xpath) {
        let tag = caps[1].to_string();
        let position: usize = caps[2]
            .parse()
            .map_err(|_| DriverError::Command(format!("bad xpath index: {}", xpath)))?;
        return Ok(nodes
            .into_iter()
            .filter(|n| tag_matches(n, &tag))
            .nth(position.saturating_sub(1))
            .into_iter()
            .collect());
    }

    let caps = SIMPLE_XPATH
        .captures(xpath)
        .ok_or_else(|| DriverError::Unsupported(format!("mock cannot evaluate xpath {}", xpath)))?;
    let tag = caps[1].to_string();
    let conditions: Vec<(String, String)> = caps
        .get(2)
        .map(|m| {
            XPATH_CONDITION
                .captures_iter(m.as_str())
                .map(|c| {
                    let value = c.get(2).or_else(|| c.get(3)).map_or("", |v| v.as_str());
                    (c[1].to_string(), value.to_string())
                })
                .collect()
        })
        .unwrap_or_default();
    if caps.get(2).is_some() && conditions.is_empty() {
        return Err(DriverError::Unsupported(format!(
            "mock cannot evaluate predicate in {}",
            xpath
        )));
    }

    Ok(nodes
        .into_iter()
        .filter(|n| tag_matches(n, &tag))
        .filter(|n| {
            conditions.is_empty()
                || conditions
                    .iter()
                    .any(|(attr, value)| n.attr(attr) == Some(value.as_str()))
        })
        .collect())
}

fn handle_for(node: &RawNode) -> ElementHandle {
    ElementHandle::new(format!("node-{}", node.index))
}

#[async_trait]
impl Driver for MockDriver {
    async fn query_element(&self, query: &QueryExpression) -> DriverResult<ElementHandle> {
        self.record(DriverCall::Query(query.clone()));
        if self.state().query_session_error {
            return Err(DriverError::Session("session terminated".to_string()));
        }
        self.evaluate(query)?
            .first()
            .map(handle_for)
            .ok_or_else(|| DriverError::NoSuchElement(query.to_string()))
    }

    async fn query_elements(&self, query: &QueryExpression) -> DriverResult<Vec<ElementHandle>> {
        self.record(DriverCall::Query(query.clone()));
        if self.state().query_session_error {
            return Err(DriverError::Session("session terminated".to_string()));
        }
        Ok(self.evaluate(query)?.iter().map(handle_for).collect())
    }

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool> {
        self.check_session()?;
        let node = self.node(element)?;
        Ok(node
            .flag("displayed")
            .or_else(|| node.flag("visible"))
            .unwrap_or(true))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool> {
        self.check_session()?;
        Ok(self.node(element)?.flag("enabled").unwrap_or(true))
    }

    async fn is_clickable(&self, element: &ElementHandle) -> DriverResult<bool> {
        Ok(self.node(element)?.flag("clickable").unwrap_or(false))
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.node(element)?;
        {
            let mut state = self.state();
            if state.click_failures > 0 {
                state.click_failures -= 1;
                return Err(DriverError::Command("element click intercepted".to_string()));
            }
        }
        self.record(DriverCall::Click(element.id.clone()));
        Ok(())
    }

    async fn set_value(&self, element: &ElementHandle, value: &str) -> DriverResult<()> {
        self.node(element)?;
        self.record(DriverCall::SetValue(element.id.clone(), value.to_string()));
        Ok(())
    }

    async fn get_text(&self, element: &ElementHandle) -> DriverResult<String> {
        let node = self.node(element)?;
        Ok(node
            .non_empty("text")
            .or_else(|| node.non_empty("label"))
            .or_else(|| node.non_empty("value"))
            .unwrap_or_default()
            .to_string())
    }

    async fn get_location(&self, element: &ElementHandle) -> DriverResult<Point> {
        let bounds = self
            .node(element)?
            .bounds()
            .ok_or_else(|| DriverError::Command("element has no bounds".to_string()))?;
        Ok(Point::new(bounds.x, bounds.y))
    }

    async fn get_size(&self, element: &ElementHandle) -> DriverResult<(f64, f64)> {
        let bounds = self
            .node(element)?
            .bounds()
            .ok_or_else(|| DriverError::Command("element has no bounds".to_string()))?;
        Ok((bounds.width, bounds.height))
    }

    async fn get_accessibility_tree(&self) -> DriverResult<String> {
        self.record(DriverCall::Tree);
        let state = self.state();
        if state.fail_tree {
            return Err(DriverError::Command("page source unavailable".to_string()));
        }
        Ok(state.trees.get(state.current).cloned().unwrap_or_default())
    }

    async fn get_viewport_size(&self) -> DriverResult<ViewportSize> {
        self.state()
            .viewport
            .ok_or_else(|| DriverError::Command("window size unavailable".to_string()))
    }

    async fn tap(&self, point: Point) -> DriverResult<()> {
        self.record(DriverCall::Tap(point));
        Ok(())
    }

    async fn swipe(&self, path: &SwipePath) -> DriverResult<()> {
        self.record(DriverCall::Swipe(*path));
        if self.state().fail_swipe {
            return Err(DriverError::Command("pointer actions rejected".to_string()));
        }
        self.advance();
        Ok(())
    }

    async fn take_screenshot(&self) -> DriverResult<Vec<u8>> {
        self.record(DriverCall::Screenshot);
        let state = self.state();
        if state.fail_screenshot {
            return Err(DriverError::Command("screenshot failed".to_string()));
        }
        Ok(state.screenshot.clone())
    }

    async fn execute_mobile(&self, command: &MobileCommand) -> DriverResult<Value> {
        self.record(DriverCall::Mobile(command.clone()));
        if self.state().fail_native_scroll {
            return Err(DriverError::Unsupported(command.script.clone()));
        }
        self.advance();
        Ok(json!(true))
    }

    async fn current_activity(&self) -> DriverResult<String> {
        self.state()
            .activity
            .clone()
            .ok_or_else(|| DriverError::Unsupported("current_activity".to_string()))
    }

    async fn current_package(&self) -> DriverResult<String> {
        self.state()
            .package
            .clone()
            .ok_or_else(|| DriverError::Unsupported("current_package".to_string()))
    }

    async fn orientation(&self) -> DriverResult<String> {
        self.state()
            .orientation
            .clone()
            .ok_or_else(|| DriverError::Unsupported("orientation".to_string()))
    }

    async fn ping(&self) -> DriverResult<()> {
        self.record(DriverCall::Ping);
        if self.state().fail_ping {
            return Err(DriverError::Session("session expired".to_string()));
        }
        Ok(())
    }
}
