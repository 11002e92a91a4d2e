//! Accessibility-tree correlation for coordinate fallbacks.
//!
//! When no locator resolves, the analyzer reads the current tree, picks the
//! records that plausibly match what the caller described, and turns each
//! into a screen coordinate with a confidence score. If nothing in the tree
//! correlates, static positions for common UI vocabulary are offered instead.
//! The analyzer ranks; it never rejects.

use crate::config::{HeuristicRule, ScoringWeights};
use crate::error::{EngineError, Result};
use crate::finder::ElementFinder;
use crate::geometry::{Point, Rect, ViewportSize};
use crate::locator::LocatorSpec;
use crate::tree::{ElementRecord, parse_records};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionMethod {
    TreeCorrelation,
    HeuristicPattern,
    CoordinateHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub rel_x: f64,
    pub rel_y: f64,
}

impl Coordinates {
    fn new(point: Point, viewport: ViewportSize) -> Self {
        let (rel_x, rel_y) = viewport.fraction_of(&point);
        Self {
            x: point.x,
            y: point.y,
            rel_x,
            rel_y,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub description: String,
    pub coordinates: Coordinates,
    pub bounds: Option<Rect>,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub method: SuggestionMethod,
    /// Locator derived from the matching record, for tree correlations.
    pub locator: Option<LocatorSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub target_description: String,
    pub text_to_find: Option<String>,
    pub coordinate_hint: Option<Point>,
}

impl AnalysisRequest {
    pub fn new(target_description: impl Into<String>) -> Self {
        Self {
            target_description: target_description.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_to_find = Some(text.into());
        self
    }

    pub fn with_hint(mut self, point: Point) -> Self {
        self.coordinate_hint = Some(point);
        self
    }
}

/// Lowercased words longer than two characters.
fn keywords(description: &str) -> Vec<String> {
    description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

fn looks_like_button(record: &ElementRecord) -> bool {
    record.tag.to_lowercase().contains("button")
        || contains_ci(record.class_name.as_deref(), "button")
        || contains_ci(record.resource_id.as_deref(), "btn")
}

fn keyword_hit(record: &ElementRecord, keyword: &str) -> bool {
    if keyword == "button" && looks_like_button(record) {
        return true;
    }
    record
        .identifiers()
        .any(|field| field.to_lowercase().contains(keyword))
}

/// Description-like attribute: `content-desc` on Android, `name` on iOS.
fn description_of(record: &ElementRecord) -> Option<&str> {
    record.content_desc.as_deref().or(record.name.as_deref())
}

#[derive(Clone)]
pub struct AccessibilityCorrelationAnalyzer {
    finder: ElementFinder,
    weights: ScoringWeights,
    heuristics: Vec<HeuristicRule>,
    fallback_viewport: ViewportSize,
}

impl AccessibilityCorrelationAnalyzer {
    pub fn new(
        finder: ElementFinder,
        weights: ScoringWeights,
        heuristics: Vec<HeuristicRule>,
        fallback_viewport: ViewportSize,
    ) -> Self {
        Self {
            finder,
            weights,
            heuristics,
            fallback_viewport,
        }
    }

    /// Whether `record` plausibly is the element the request describes.
    pub fn matches(&self, record: &ElementRecord, request: &AnalysisRequest) -> bool {
        if let Some(text) = request.text_to_find.as_deref().map(str::to_lowercase) {
            if !text.is_empty()
                && (contains_ci(record.visible_text(), &text)
                    || contains_ci(description_of(record), &text))
            {
                return true;
            }
        }
        keywords(&request.target_description)
            .iter()
            .any(|k| keyword_hit(record, k))
    }

    /// Weighted confidence for a matching record, clamped to 1.0.
    pub fn score(&self, record: &ElementRecord, request: &AnalysisRequest) -> f64 {
        let w = &self.weights;
        let mut score = 0.0;

        if let Some(text) = request.text_to_find.as_deref().map(str::to_lowercase) {
            if !text.is_empty() {
                match record.visible_text().map(str::to_lowercase) {
                    Some(visible) if visible == text => score += w.exact_text,
                    Some(visible) if visible.contains(&text) => score += w.partial_text,
                    _ => {}
                }
                if contains_ci(description_of(record), &text) {
                    score += w.content_description;
                }
            }
        }
        if record.clickable {
            score += w.clickable;
        }
        if record.enabled {
            score += w.enabled;
        }
        if let Some(id) = record.resource_id.as_deref().map(str::to_lowercase) {
            let overlap = keywords(&request.target_description)
                .iter()
                .any(|k| id.contains(k.as_str()) || (k == "button" && id.contains("btn")));
            if overlap {
                score += w.resource_id_keyword;
            }
        }

        score.clamp(0.0, 1.0)
    }

    /// Ranks coordinate suggestions for the current screen.
    pub async fn analyze_current(&self, request: &AnalysisRequest) -> Result<Vec<Suggestion>> {
        let tree = self
            .finder
            .driver()
            .get_accessibility_tree()
            .await
            .map_err(|e| EngineError::driver("get_accessibility_tree", e))?;
        self.analyze(&tree, request).await
    }

    /// Ranked suggestions, highest confidence first. Ties keep discovery
    /// order. An unreadable tree simply yields no correlations.
    pub async fn analyze(&self, tree: &str, request: &AnalysisRequest) -> Result<Vec<Suggestion>> {
        let viewport = self.viewport().await;
        let records = parse_records(tree);
        let mut suggestions = Vec::new();

        for record in records.iter().filter(|r| self.matches(r, request)) {
            let Some(bounds) = self.resolve_bounds(record).await else {
                debug!(selector = %record.derived_selector, "matched record has no bounds");
                continue;
            };
            suggestions.push(Suggestion {
                description: describe(record),
                coordinates: Coordinates::new(bounds.center(), viewport),
                bounds: Some(bounds),
                confidence: self.score(record, request),
                method: SuggestionMethod::TreeCorrelation,
                locator: Some(record.locator()),
            });
        }

        if suggestions.is_empty() {
            let target = request.target_description.as_str();
            for rule in self.heuristics.iter().filter(|r| r.matches(target)) {
                suggestions.push(Suggestion {
                    description: rule.description.clone(),
                    coordinates: Coordinates::new(viewport.at_fraction(rule.rel_x, rule.rel_y), viewport),
                    bounds: None,
                    confidence: rule.confidence.clamp(0.0, 1.0),
                    method: SuggestionMethod::HeuristicPattern,
                    locator: None,
                });
            }
        }

        if let Some(hint) = request.coordinate_hint {
            suggestions.push(Suggestion {
                description: "Caller-supplied coordinates".to_string(),
                coordinates: Coordinates::new(hint, viewport),
                bounds: None,
                confidence: self.weights.coordinate_hint.clamp(0.0, 1.0),
                method: SuggestionMethod::CoordinateHint,
                locator: None,
            });
        }

        sort_by_confidence(&mut suggestions);
        info!(
            target = %request.target_description,
            count = suggestions.len(),
            top = suggestions.first().map(|s| s.confidence),
            "ranked coordinate suggestions"
        );
        Ok(suggestions)
    }

    /// Live element rect when the driver can resolve the record, otherwise
    /// the bounds recorded in the tree.
    async fn resolve_bounds(&self, record: &ElementRecord) -> Option<Rect> {
        let live = match self.finder.locate(&record.locator()).await {
            Ok(Some(handle)) => self.finder.driver().element_rect(&handle).await.ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(selector = %record.derived_selector, error = %e, "record did not resolve");
                None
            }
        };
        live.filter(|r| !r.is_empty())
            .or(record.bounds)
            .filter(|r| !r.is_empty())
    }

    async fn viewport(&self) -> ViewportSize {
        self.finder
            .driver()
            .get_viewport_size()
            .await
            .unwrap_or(self.fallback_viewport)
    }
}

fn describe(record: &ElementRecord) -> String {
    let kind = record
        .tag
        .rsplit('.')
        .next()
        .unwrap_or(&record.tag)
        .trim_start_matches("XCUIElementType");
    match record.visible_text().or(description_of(record)) {
        Some(label) => format!("{} '{}'", kind, label),
        None => format!("{} {}", kind, record.derived_selector),
    }
}

pub fn sort_by_confidence(suggestions: &mut [Suggestion]) {
    // `sort_by` is stable, so equal scores keep discovery order.
    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaitConfig;
    use crate::mock::MockDriver;
    use crate::platform::{Platform, PlatformContext};
    use proptest::prelude::{any, prop_assert, proptest};
    use std::sync::Arc;

    const LOGIN_SCREEN: &str = r#"<hierarchy>
  <android.widget.EditText resource-id="com.app:id/username" text="" clickable="true" bounds="[40,600][1040,720]"/>
  <android.widget.Button resource-id="com.app:id/login_btn" text="Log in" clickable="true" enabled="true" bounds="[340,1500][740,1620]"/>
  <android.widget.TextView text="Forgot password?" clickable="true" bounds="[340,1700][740,1760]"/>
</hierarchy>"#;

    const NOTHING_RELEVANT: &str = r#"<hierarchy>
  <android.widget.TextView text="Welcome" bounds="[0,100][1080,200]"/>
  <android.view.View bounds="[0,0][1080,1920]"/>
</hierarchy>"#;

    fn analyzer(tree: &str) -> (AccessibilityCorrelationAnalyzer, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::with_tree(tree));
        let finder = ElementFinder::new(
            driver.clone(),
            PlatformContext::new(Platform::Android),
            WaitConfig::default(),
        );
        let analyzer = AccessibilityCorrelationAnalyzer::new(
            finder,
            ScoringWeights::default(),
            HeuristicRule::defaults(),
            ViewportSize::new(1080, 1920),
        );
        (analyzer, driver)
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let (analyzer, _) = analyzer(LOGIN_SCREEN);
        let request = AnalysisRequest::new("login button").with_text("Log in");
        let suggestions = analyzer.analyze(LOGIN_SCREEN, &request).await.unwrap();

        let top = &suggestions[0];
        assert_eq!(top.method, SuggestionMethod::TreeCorrelation);
        assert_eq!(top.description, "Button 'Log in'");
        // exact text + clickable + enabled + id keyword, clamped
        assert_eq!(top.confidence, 1.0);
        assert_eq!(top.coordinates.x, 540.0);
        assert_eq!(top.coordinates.y, 1560.0);
        assert_eq!(top.locator, Some(LocatorSpec::id("com.app:id/login_btn")));
        assert!(suggestions.iter().all(|s| s.method != SuggestionMethod::HeuristicPattern));
    }

    #[test]
    fn test_partial_text_scores_below_exact() {
        let (analyzer, _) = analyzer(LOGIN_SCREEN);
        let record = parse_records(LOGIN_SCREEN)
            .into_iter()
            .find(|r| r.text.as_deref() == Some("Forgot password?"))
            .unwrap();
        let request = AnalysisRequest::new("recover account").with_text("password");
        assert!(analyzer.matches(&record, &request));
        // partial text + clickable + enabled
        let score = analyzer.score(&record, &request);
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_heuristic_when_nothing_correlates() {
        let (analyzer, _) = analyzer(NOTHING_RELEVANT);
        let suggestions = analyzer
            .analyze(NOTHING_RELEVANT, &AnalysisRequest::new("login button"))
            .await
            .unwrap();

        assert_eq!(suggestions.len(), 1);
        let top = &suggestions[0];
        assert_eq!(top.description, "Bottom center");
        assert_eq!(top.confidence, 0.4);
        assert_eq!(top.method, SuggestionMethod::HeuristicPattern);
        assert_eq!(top.coordinates.x, 540.0);
        assert_eq!(top.coordinates.y, 1536.0);
        assert_eq!(top.coordinates.rel_y, 0.8);
    }

    #[tokio::test]
    async fn test_coordinate_hint_always_included() {
        let (analyzer, _) = analyzer(NOTHING_RELEVANT);
        let request = AnalysisRequest::new("close dialog").with_hint(Point::new(1000.0, 150.0));
        let suggestions = analyzer.analyze(NOTHING_RELEVANT, &request).await.unwrap();

        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].method, SuggestionMethod::CoordinateHint);
        assert_eq!(suggestions[0].confidence, 0.7);
        assert_eq!(suggestions[1].description, "Top right");
    }

    #[tokio::test]
    async fn test_unknown_target_yields_nothing() {
        let (analyzer, _) = analyzer(NOTHING_RELEVANT);
        let suggestions = analyzer
            .analyze(NOTHING_RELEVANT, &AnalysisRequest::new("zz"))
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_viewport_fallback_when_driver_cannot_report() {
        let (analyzer, driver) = analyzer(NOTHING_RELEVANT);
        driver.set_viewport(None);
        let suggestions = analyzer
            .analyze(NOTHING_RELEVANT, &AnalysisRequest::new("next"))
            .await
            .unwrap();
        assert_eq!(suggestions[0].coordinates.x, 864.0);
        assert_eq!(suggestions[0].coordinates.y, 1632.0);
    }

    #[test]
    fn test_stable_sort_keeps_discovery_order() {
        let make = |name: &str, confidence: f64| Suggestion {
            description: name.to_string(),
            coordinates: Coordinates {
                x: 0.0,
                y: 0.0,
                rel_x: 0.0,
                rel_y: 0.0,
            },
            bounds: None,
            confidence,
            method: SuggestionMethod::HeuristicPattern,
            locator: None,
        };
        let mut list = vec![make("a", 0.3), make("b", 0.5), make("c", 0.3)];
        sort_by_confidence(&mut list);
        let order: Vec<&str> = list.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    proptest! {
        #[test]
        fn prop_suggestions_sorted_and_bounded(
            texts in proptest::collection::vec("[a-z]{1,8}", 0..6),
            needle in "[a-z]{1,4}",
            clickable in any::<bool>(),
        ) {
            let body: String = texts
                .iter()
                .enumerate()
                .map(|(i, t)| format!(
                    r#"<android.widget.Button text="{}" clickable="{}" bounds="[0,{}][100,{}]"/>"#,
                    t, clickable, i * 100, i * 100 + 80
                ))
                .collect();
            let tree = format!("<hierarchy>{}</hierarchy>", body);
            let (analyzer, _) = analyzer(&tree);
            let request = AnalysisRequest::new(format!("{} button", needle))
                .with_text(needle.clone())
                .with_hint(Point::new(10.0, 10.0));

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let suggestions = runtime.block_on(analyzer.analyze(&tree, &request)).unwrap();

            for pair in suggestions.windows(2) {
                prop_assert!(pair[0].confidence >= pair[1].confidence);
            }
            for s in &suggestions {
                prop_assert!((0.0..=1.0).contains(&s.confidence));
            }
        }
    }
}
