use super::container::{ScrollableContainer, ScrollableContainerDetector};
use crate::config::ScrollConfig;
use crate::error::{DriverError, Result};
use crate::finder::ElementFinder;
use crate::geometry::{Direction, Rect, ViewportSize};
use crate::locator::LocatorSpec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Per-invocation bookkeeping for stuck detection.
#[derive(Debug, Clone, Default)]
pub struct ScrollAttemptState {
    pub scroll_count: u32,
    pub stuck_counter: u32,
    /// `None` disables stuck detection for the run.
    pub last_tree_snapshot: Option<String>,
}

impl ScrollAttemptState {
    pub fn new(initial_snapshot: Option<String>) -> Self {
        Self {
            scroll_count: 0,
            stuck_counter: 0,
            last_tree_snapshot: initial_snapshot,
        }
    }

    /// Compares `current` to the last snapshot, returning the stuck counter.
    /// Any change resets the counter and replaces the snapshot.
    pub fn observe(&mut self, current: Option<String>) -> u32 {
        let (Some(last), Some(current)) = (self.last_tree_snapshot.as_ref(), current) else {
            return self.stuck_counter;
        };
        if *last == current {
            self.stuck_counter += 1;
        } else {
            self.stuck_counter = 0;
            self.last_tree_snapshot = Some(current);
        }
        self.stuck_counter
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollOutcome {
    pub found: bool,
    pub attempts_used: u32,
    /// Stopped early because the screen stopped changing.
    pub reached_end: bool,
    pub failed_gestures: u32,
    pub container: Option<ScrollableContainer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    Native,
    Pointer,
}

/// Scrolls toward an element until it is usable, the content stops moving
/// or the attempt limit runs out.
#[derive(Clone)]
pub struct AdaptiveScroller {
    finder: ElementFinder,
    detector: ScrollableContainerDetector,
    config: ScrollConfig,
    fallback_viewport: ViewportSize,
}

impl AdaptiveScroller {
    pub fn new(finder: ElementFinder, config: ScrollConfig, fallback_viewport: ViewportSize) -> Self {
        Self {
            finder,
            detector: ScrollableContainerDetector::new(),
            config,
            fallback_viewport,
        }
    }

    pub fn config(&self) -> &ScrollConfig {
        &self.config
    }

    pub async fn scroll_until_found(
        &self,
        locator: &LocatorSpec,
        direction: Direction,
        max_attempts: u32,
        distance_hint_px: Option<f64>,
    ) -> Result<ScrollOutcome> {
        if self.finder.is_ready(locator).await? {
            debug!(%locator, "element ready before scrolling");
            return Ok(ScrollOutcome {
                found: true,
                attempts_used: 0,
                reached_end: false,
                failed_gestures: 0,
                container: None,
            });
        }

        let initial_tree = self.snapshot().await;
        let container = initial_tree
            .as_deref()
            .and_then(|tree| self.detector.detect(tree));
        let area = self.scroll_area(container.as_ref()).await;
        if initial_tree.is_none() {
            warn!("no initial tree snapshot, stuck detection disabled");
        }

        let mut state = ScrollAttemptState::new(initial_tree);
        let mut failed_gestures = 0u32;
        let mut reached_end = false;
        let hint = container.as_ref().and_then(|c| c.element_id_hint.clone());

        info!(
            %locator,
            %direction,
            max_attempts,
            container = container.as_ref().map(|c| c.kind.as_str()),
            "scrolling to find element"
        );

        while state.scroll_count < max_attempts {
            if self.finder.is_ready(locator).await? {
                return Ok(self.outcome(true, &state, false, failed_gestures, container));
            }

            let current = self.snapshot().await;
            let stuck = state.observe(current);
            if stuck >= self.config.stuck_threshold {
                info!(
                    attempts = state.scroll_count,
                    stuck, "reached end of content, stopping early"
                );
                reached_end = true;
                break;
            }

            state.scroll_count += 1;
            match self
                .gesture(&area, direction, distance_hint_px, hint.as_deref())
                .await
            {
                Ok(kind) => debug!(attempt = state.scroll_count, ?kind, "scroll gesture issued"),
                Err(e) => {
                    failed_gestures += 1;
                    warn!(attempt = state.scroll_count, error = %e, "scroll gesture failed");
                }
            }
            tokio::time::sleep(self.config.settle_delay()).await;

            // Visible but disabled counts as not yet found.
            if self.finder.is_ready(locator).await? {
                return Ok(self.outcome(true, &state, false, failed_gestures, container));
            }
        }

        tokio::time::sleep(self.config.final_lookup_delay()).await;
        let found = self.finder.is_ready(locator).await?;
        if !found {
            info!(%locator, attempts = state.scroll_count, reached_end, "element not found by scrolling");
        }
        Ok(self.outcome(found, &state, reached_end, failed_gestures, container))
    }

    fn outcome(
        &self,
        found: bool,
        state: &ScrollAttemptState,
        reached_end: bool,
        failed_gestures: u32,
        container: Option<ScrollableContainer>,
    ) -> ScrollOutcome {
        ScrollOutcome {
            found,
            attempts_used: state.scroll_count,
            reached_end,
            failed_gestures,
            container,
        }
    }

    async fn snapshot(&self) -> Option<String> {
        match self.finder.driver().get_accessibility_tree().await {
            Ok(tree) => Some(tree),
            Err(e) => {
                debug!(error = %e, "tree snapshot unavailable");
                None
            }
        }
    }

    /// Container bounds when known, else the viewport, inset by the margin.
    async fn scroll_area(&self, container: Option<&ScrollableContainer>) -> Rect {
        let viewport = self
            .finder
            .driver()
            .get_viewport_size()
            .await
            .unwrap_or(self.fallback_viewport)
            .as_rect();
        let area = container
            .and_then(|c| c.bounds)
            .filter(|b| !b.is_empty())
            .unwrap_or(viewport);
        area.inset(self.config.edge_margin_px)
    }

    async fn gesture(
        &self,
        area: &Rect,
        direction: Direction,
        distance_hint_px: Option<f64>,
        element_hint: Option<&str>,
    ) -> std::result::Result<GestureKind, DriverError> {
        let span = if direction.is_vertical() {
            area.height
        } else {
            area.width
        };
        let distance = distance_hint_px.unwrap_or(span * self.config.distance_ratio);
        let percent = if span > 0.0 {
            (distance / span).clamp(0.05, 1.0)
        } else {
            self.config.distance_ratio
        };

        let dialect = self.finder.platform().dialect();
        let driver = self.finder.driver();

        let native = dialect.build_scroll_command(area, direction, percent, element_hint);
        match driver.execute_mobile(&native).await {
            Ok(_) => Ok(GestureKind::Native),
            Err(e) => {
                debug!(script = %native.script, error = %e, "native scroll failed, using pointer swipe");
                let swipe = dialect.build_swipe_command(
                    area,
                    direction,
                    distance,
                    self.config.gesture_duration_ms,
                );
                driver.swipe(&swipe).await.map(|_| GestureKind::Pointer)
            }
        }
    }
}
