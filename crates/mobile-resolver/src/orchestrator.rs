//! Multi-phase find-and-click.
//!
//! Phases run in a fixed order and stop at the first click that lands:
//! direct lookup, one immediate retry when only the click failed, scrolling
//! when the element was never located (in both directions for upward
//! searches), and finally a coordinate tap from tree correlation. Every
//! phase leaves a [`PhaseRecord`] so a failure explains itself.

use crate::analyzer::{AccessibilityCorrelationAnalyzer, AnalysisRequest};
use crate::config::{ClickConfig, EngineConfig};
use crate::driver::Driver;
use crate::error::{EngineError, Result};
use crate::finder::ElementFinder;
use crate::geometry::{Direction, Point};
use crate::locator::{LocatorSpec, Strategy};
use crate::platform::PlatformContext;
use crate::scroll::AdaptiveScroller;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Direct,
    ImmediateRetry,
    PrimaryScroll,
    ReverseScroll,
    CoordinateFallback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Direct => "direct",
            Phase::ImmediateRetry => "immediate_retry",
            Phase::PrimaryScroll => "primary_scroll",
            Phase::ReverseScroll => "reverse_scroll",
            Phase::CoordinateFallback => "coordinate_fallback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub succeeded: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    NeverLocated,
    NotClickable,
    DriverFailure,
}

/// Aggregated history of a find-and-click that did not land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub locator: LocatorSpec,
    pub located: bool,
    pub cause: FailureCause,
    pub history: Vec<PhaseRecord>,
}

impl FailureReport {
    pub fn message(&self) -> &'static str {
        match self.cause {
            FailureCause::NeverLocated => "element could not be found through any method",
            FailureCause::NotClickable => "element was located but could not be clicked",
            FailureCause::DriverFailure => "driver failure interrupted find-and-click",
        }
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.history.iter().map(|r| r.phase).collect()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.locator)?;
        for record in &self.history {
            write!(f, "; {}: {}", record.phase, record.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickOptions {
    /// Enables the scroll phases.
    pub scroll: bool,
    pub scroll_direction: Direction,
    /// Defaults to the scroller's configured attempt limit.
    pub max_scroll_attempts: Option<u32>,
    pub scroll_distance_px: Option<f64>,
    /// Enables the coordinate phase.
    pub coordinate_fallback: bool,
    /// What the caller is looking for, in words. Defaults to the selector.
    pub target_description: Option<String>,
    pub text_hint: Option<String>,
    pub coordinate_hint: Option<Point>,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            scroll: true,
            scroll_direction: Direction::Down,
            max_scroll_attempts: None,
            scroll_distance_px: None,
            coordinate_fallback: true,
            target_description: None,
            text_hint: None,
            coordinate_hint: None,
        }
    }
}

impl ClickOptions {
    /// Direct lookup and the immediate retry only.
    pub fn direct_only() -> Self {
        Self {
            scroll: false,
            coordinate_fallback: false,
            ..Self::default()
        }
    }

    fn analysis_request(&self, locator: &LocatorSpec) -> AnalysisRequest {
        let text_to_find = self.text_hint.clone().or_else(|| {
            matches!(
                locator.strategy,
                Strategy::Text | Strategy::ContentDescription | Strategy::AccessibilityId
            )
            .then(|| locator.selector.clone())
        });
        AnalysisRequest {
            target_description: self
                .target_description
                .clone()
                .unwrap_or_else(|| locator.selector.clone()),
            text_to_find,
            coordinate_hint: self.coordinate_hint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickOutcome {
    pub phase: Phase,
    pub located: bool,
    /// Set when the click was a raw coordinate tap.
    pub coordinates: Option<Point>,
    pub confidence: Option<f64>,
    pub warning: Option<String>,
    pub history: Vec<PhaseRecord>,
}

enum Attempt {
    Clicked,
    NotFound,
    NotDisplayed,
    ClickFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollResult {
    Clicked,
    NotClicked,
    NotFound,
}

struct CoordinateTap {
    point: Point,
    confidence: f64,
    warning: Option<String>,
}

/// Bookkeeping for one `find_and_click` call.
struct Run<'a> {
    locator: &'a LocatorSpec,
    located: bool,
    history: Vec<PhaseRecord>,
}

impl<'a> Run<'a> {
    fn new(locator: &'a LocatorSpec) -> Self {
        Self {
            locator,
            located: false,
            history: Vec::new(),
        }
    }

    fn record(&mut self, phase: Phase, succeeded: bool, detail: impl Into<String>) {
        let detail = detail.into();
        debug!(locator = %self.locator, %phase, succeeded, %detail, "phase finished");
        self.history.push(PhaseRecord {
            phase,
            succeeded,
            detail,
        });
    }

    fn succeed(mut self, phase: Phase, detail: impl Into<String>) -> ClickOutcome {
        self.record(phase, true, detail);
        info!(locator = %self.locator, %phase, "element clicked");
        ClickOutcome {
            phase,
            located: self.located,
            coordinates: None,
            confidence: None,
            warning: None,
            history: self.history,
        }
    }

    fn fail(self) -> EngineError {
        let cause = if self.located {
            FailureCause::NotClickable
        } else {
            FailureCause::NeverLocated
        };
        self.into_error(cause)
    }

    /// Caller misuse passes through untouched; anything else ends the run
    /// with the history gathered so far.
    fn abort(mut self, phase: Phase, error: EngineError) -> EngineError {
        if matches!(error, EngineError::UnsupportedStrategy { .. }) {
            return error;
        }
        self.record(phase, false, error.to_string());
        self.into_error(FailureCause::DriverFailure)
    }

    fn into_error(self, cause: FailureCause) -> EngineError {
        let report = FailureReport {
            locator: self.locator.clone(),
            located: self.located,
            cause,
            history: self.history,
        };
        warn!(%report, "find-and-click failed");
        EngineError::FindAndClick(Box::new(report))
    }
}

#[derive(Clone)]
pub struct FindAndClickOrchestrator {
    finder: ElementFinder,
    scroller: AdaptiveScroller,
    analyzer: AccessibilityCorrelationAnalyzer,
    click: ClickConfig,
}

impl FindAndClickOrchestrator {
    pub fn new(
        finder: ElementFinder,
        scroller: AdaptiveScroller,
        analyzer: AccessibilityCorrelationAnalyzer,
        click: ClickConfig,
    ) -> Self {
        Self {
            finder,
            scroller,
            analyzer,
            click,
        }
    }

    pub fn from_config(driver: Arc<dyn Driver>, platform: PlatformContext, config: &EngineConfig) -> Self {
        let finder = ElementFinder::new(driver, platform, config.wait.clone());
        let fallback_viewport = config.session.fallback_viewport;
        let scroller = AdaptiveScroller::new(finder.clone(), config.scroll.clone(), fallback_viewport);
        let analyzer = AccessibilityCorrelationAnalyzer::new(
            finder.clone(),
            config.scoring.clone(),
            config.heuristics.clone(),
            fallback_viewport,
        );
        Self::new(finder, scroller, analyzer, config.click.clone())
    }

    pub async fn find_and_click(
        &self,
        locator: &LocatorSpec,
        options: &ClickOptions,
    ) -> Result<ClickOutcome> {
        let mut run = Run::new(locator);

        let direct = match self.try_click(locator).await {
            Ok(attempt) => attempt,
            Err(e) => return Err(run.abort(Phase::Direct, e)),
        };

        match direct {
            Attempt::Clicked => {
                run.located = true;
                return Ok(run.succeed(Phase::Direct, "clicked"));
            }
            Attempt::ClickFailed(reason) => {
                run.located = true;
                run.record(
                    Phase::Direct,
                    false,
                    format!("located but click failed: {}", reason),
                );

                tokio::time::sleep(self.click.retry_delay()).await;
                match self.try_click(locator).await {
                    Ok(Attempt::Clicked) => {
                        return Ok(run.succeed(Phase::ImmediateRetry, "clicked on retry"));
                    }
                    Ok(other) => run.record(Phase::ImmediateRetry, false, describe_attempt(&other)),
                    Err(e) => return Err(run.abort(Phase::ImmediateRetry, e)),
                }
            }
            missed => {
                if matches!(missed, Attempt::NotDisplayed) {
                    run.located = true;
                }
                run.record(Phase::Direct, false, describe_attempt(&missed));

                if options.scroll {
                    let primary = options.scroll_direction;
                    let result = match self
                        .scroll_phase(&mut run, Phase::PrimaryScroll, primary, options)
                        .await
                    {
                        Ok(result) => result,
                        Err(e) => return Err(run.abort(Phase::PrimaryScroll, e)),
                    };
                    if result == ScrollResult::Clicked {
                        let detail = format!("clicked after scrolling {}", primary);
                        return Ok(run.succeed(Phase::PrimaryScroll, detail));
                    }

                    // Upward searches are the unusual case; their failure
                    // earns a full pass in the other direction.
                    if primary == Direction::Up && result == ScrollResult::NotFound {
                        let reverse = primary.opposite();
                        let result = match self
                            .scroll_phase(&mut run, Phase::ReverseScroll, reverse, options)
                            .await
                        {
                            Ok(result) => result,
                            Err(e) => return Err(run.abort(Phase::ReverseScroll, e)),
                        };
                        if result == ScrollResult::Clicked {
                            let detail = format!("clicked after scrolling {}", reverse);
                            return Ok(run.succeed(Phase::ReverseScroll, detail));
                        }
                    }
                }
            }
        }

        if options.coordinate_fallback {
            if let Some(tap) = self.coordinate_phase(&mut run, locator, options).await {
                let detail = format!(
                    "tapped ({:.0}, {:.0}) at confidence {:.2}",
                    tap.point.x, tap.point.y, tap.confidence
                );
                let mut outcome = run.succeed(Phase::CoordinateFallback, detail);
                outcome.coordinates = Some(tap.point);
                outcome.confidence = Some(tap.confidence);
                outcome.warning = tap.warning;
                return Ok(outcome);
            }
        }

        Err(run.fail())
    }

    async fn try_click(&self, locator: &LocatorSpec) -> Result<Attempt> {
        let Some(handle) = self.finder.locate(locator).await? else {
            return Ok(Attempt::NotFound);
        };
        if !self.finder.is_displayed(&handle).await? {
            return Ok(Attempt::NotDisplayed);
        }
        match self.finder.driver().click(&handle).await {
            Ok(()) => Ok(Attempt::Clicked),
            Err(e) => {
                let reason = e.to_string();
                let error = EngineError::driver("click", e);
                // Only interaction failures earn the immediate retry.
                if error.is_retryable() {
                    Ok(Attempt::ClickFailed(reason))
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Scrolls toward the element and clicks it once it is in view.
    async fn scroll_phase(
        &self,
        run: &mut Run<'_>,
        phase: Phase,
        direction: Direction,
        options: &ClickOptions,
    ) -> Result<ScrollResult> {
        let max_attempts = options
            .max_scroll_attempts
            .unwrap_or(self.scroller.config().max_attempts);
        let outcome = self
            .scroller
            .scroll_until_found(run.locator, direction, max_attempts, options.scroll_distance_px)
            .await?;

        if !outcome.found {
            let detail = if outcome.reached_end {
                format!(
                    "not found scrolling {}; reached end of content after {} attempts",
                    direction, outcome.attempts_used
                )
            } else {
                format!(
                    "not found scrolling {} after {} attempts",
                    direction, outcome.attempts_used
                )
            };
            run.record(phase, false, detail);
            return Ok(ScrollResult::NotFound);
        }

        run.located = true;
        match self.try_click(run.locator).await? {
            Attempt::Clicked => Ok(ScrollResult::Clicked),
            other => {
                run.record(
                    phase,
                    false,
                    format!(
                        "found after {} scroll attempts but {}",
                        outcome.attempts_used,
                        describe_attempt(&other)
                    ),
                );
                Ok(ScrollResult::NotClicked)
            }
        }
    }

    async fn coordinate_phase(
        &self,
        run: &mut Run<'_>,
        locator: &LocatorSpec,
        options: &ClickOptions,
    ) -> Option<CoordinateTap> {
        let request = options.analysis_request(locator);
        let suggestions = match self.analyzer.analyze_current(&request).await {
            Ok(suggestions) => suggestions,
            Err(e) => {
                run.record(Phase::CoordinateFallback, false, e.to_string());
                return None;
            }
        };

        let Some(top) = suggestions.first() else {
            let inconclusive = EngineError::AnalysisInconclusive(format!(
                "no suggestions for '{}'",
                request.target_description
            ));
            run.record(Phase::CoordinateFallback, false, inconclusive.to_string());
            return None;
        };

        let warning = (top.confidence < self.click.low_confidence_threshold).then(|| {
            format!(
                "low confidence coordinate click: {} at {:.2} (threshold {:.2})",
                top.description, top.confidence, self.click.low_confidence_threshold
            )
        });
        if let Some(w) = &warning {
            warn!(locator = %locator, "{}", w);
        }

        let point = top.coordinates.point();
        match self.finder.driver().tap(point).await {
            Ok(()) => Some(CoordinateTap {
                point,
                confidence: top.confidence,
                warning,
            }),
            Err(e) => {
                run.record(
                    Phase::CoordinateFallback,
                    false,
                    format!("tap at ({:.0}, {:.0}) failed: {}", point.x, point.y, e),
                );
                None
            }
        }
    }
}

fn describe_attempt(attempt: &Attempt) -> String {
    match attempt {
        Attempt::Clicked => "clicked".to_string(),
        Attempt::NotFound => "no element matched".to_string(),
        Attempt::NotDisplayed => "located but not displayed".to_string(),
        Attempt::ClickFailed(reason) => format!("click failed: {}", reason),
    }
}
