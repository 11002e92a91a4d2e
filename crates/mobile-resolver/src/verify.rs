//! Post-action assertions.
//!
//! A verification walks a fixed list of methods (direct lookup, alternative
//! locators derived from the tree, optional scrolling, raw tree search) and
//! stops at the first one that settles the question. Every method tried is
//! reported back so flaky assertions can be diagnosed.

use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::error::{EngineError, Result};
use crate::finder::{ElementFinder, ElementProbe};
use crate::geometry::Direction;
use crate::locator::{LocatorSpec, Strategy};
use crate::platform::PlatformContext;
use crate::scroll::AdaptiveScroller;
use crate::tree::parse_records;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    ElementVisible,
    ElementHidden,
    TextPresent,
    TextAbsent,
    ElementEnabled,
    ElementDisabled,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::ElementVisible => "element_visible",
            VerificationType::ElementHidden => "element_hidden",
            VerificationType::TextPresent => "text_present",
            VerificationType::TextAbsent => "text_absent",
            VerificationType::ElementEnabled => "element_enabled",
            VerificationType::ElementDisabled => "element_disabled",
        }
    }

    fn default_strategy(&self) -> Strategy {
        match self {
            VerificationType::TextPresent | VerificationType::TextAbsent => Strategy::Text,
            _ => Strategy::Id,
        }
    }

    /// Asserts that something is gone rather than there.
    fn is_negative(&self) -> bool {
        matches!(
            self,
            VerificationType::ElementHidden | VerificationType::TextAbsent
        )
    }

    fn judge(&self, method: VerifyMethod, observation: Observation) -> Judgement {
        use Judgement::{Fail, Pass, Stop};
        use Observation::{Absent, Present};

        match (self, observation) {
            (
                VerificationType::ElementVisible | VerificationType::TextPresent,
                Present { displayed: true, .. },
            ) => Pass("found"),
            (VerificationType::ElementVisible | VerificationType::TextPresent, Present { .. }) => {
                Fail("not_displayed")
            }
            (VerificationType::ElementVisible | VerificationType::TextPresent, Absent) => {
                Fail("not_found")
            }

            (VerificationType::ElementHidden, Absent) => Pass("not_found"),
            // Locator misses say nothing about the text appearing inside a
            // longer string; only the tree search can clear it.
            (VerificationType::TextAbsent, Absent) if method == VerifyMethod::TreeSearch => {
                Pass("not_found")
            }
            (VerificationType::TextAbsent, Absent) => Fail("not_found"),
            (
                VerificationType::ElementHidden | VerificationType::TextAbsent,
                Present { displayed: false, .. },
            ) => Pass("not_displayed"),
            (VerificationType::ElementHidden | VerificationType::TextAbsent, Present { .. }) => {
                Stop("visible")
            }

            (VerificationType::ElementEnabled, Present { enabled: true, .. }) => Pass("enabled"),
            (VerificationType::ElementEnabled, Present { .. }) => Fail("disabled"),
            (VerificationType::ElementEnabled, Absent) => Fail("element_not_found"),

            // Disabled means found but not enabled; absence is its own outcome.
            (VerificationType::ElementDisabled, Present { enabled: false, .. }) => Pass("disabled"),
            (VerificationType::ElementDisabled, Present { .. }) => Stop("enabled"),
            (VerificationType::ElementDisabled, Absent) => Fail("element_not_found"),
        }
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "element_visible" => Ok(VerificationType::ElementVisible),
            "element_hidden" => Ok(VerificationType::ElementHidden),
            "text_present" => Ok(VerificationType::TextPresent),
            "text_absent" => Ok(VerificationType::TextAbsent),
            "element_enabled" => Ok(VerificationType::ElementEnabled),
            "element_disabled" => Ok(VerificationType::ElementDisabled),
            other => Err(EngineError::Config(format!(
                "unknown verification type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSpec {
    #[serde(rename = "type")]
    pub kind: VerificationType,
    pub strategy: Option<Strategy>,
    pub selector: String,
}

impl VerificationSpec {
    pub fn new(kind: VerificationType, selector: impl Into<String>) -> Self {
        Self {
            kind,
            strategy: None,
            selector: selector.into(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn locator(&self) -> LocatorSpec {
        LocatorSpec::new(
            self.strategy.unwrap_or_else(|| self.kind.default_strategy()),
            self.selector.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Opt-in scroll-assisted lookup.
    pub scroll: bool,
    pub scroll_direction: Direction,
    pub max_scroll_attempts: Option<u32>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            scroll: false,
            scroll_direction: Direction::Down,
            max_scroll_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMethod {
    Direct,
    AlternativeStrategy,
    ScrollAssisted,
    TreeSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodAttempt {
    pub method: VerifyMethod,
    pub succeeded: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDetails {
    pub reason: String,
    pub matched_by: Option<VerifyMethod>,
    pub locator: LocatorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub methods_tried: Vec<MethodAttempt>,
    pub details: VerificationDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    Absent,
    Present { displayed: bool, enabled: bool },
}

impl From<Option<&ElementProbe>> for Observation {
    fn from(probe: Option<&ElementProbe>) -> Self {
        match probe {
            Some(p) => Observation::Present {
                displayed: p.displayed,
                enabled: p.enabled,
            },
            None => Observation::Absent,
        }
    }
}

/// Verdict of one method for one verification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Judgement {
    Pass(&'static str),
    /// Not satisfied here; later methods may still succeed.
    Fail(&'static str),
    /// Contradicted; no later method can change the answer.
    Stop(&'static str),
}

#[derive(Clone)]
pub struct VerificationEngine {
    finder: ElementFinder,
    scroller: AdaptiveScroller,
}

impl VerificationEngine {
    pub fn new(finder: ElementFinder, scroller: AdaptiveScroller) -> Self {
        Self { finder, scroller }
    }

    pub fn from_config(driver: Arc<dyn Driver>, platform: PlatformContext, config: &EngineConfig) -> Self {
        let finder = ElementFinder::new(driver, platform, config.wait.clone());
        let scroller = AdaptiveScroller::new(
            finder.clone(),
            config.scroll.clone(),
            config.session.fallback_viewport,
        );
        Self::new(finder, scroller)
    }

    pub async fn verify(&self, spec: &VerificationSpec, options: &VerifyOptions) -> Result<VerificationResult> {
        let locator = spec.locator();
        // Caller misuse surfaces before any method runs.
        locator.translate(self.finder.platform().platform())?;

        let mut methods = vec![VerifyMethod::Direct, VerifyMethod::AlternativeStrategy];
        if options.scroll && !spec.kind.is_negative() {
            methods.push(VerifyMethod::ScrollAssisted);
        }
        methods.push(VerifyMethod::TreeSearch);

        let mut attempts = Vec::new();
        let mut present_reason: Option<&'static str> = None;
        let mut last_reason: &'static str = "not_found";

        for method in methods {
            let observation = match self.observe(method, spec, &locator, options).await {
                Ok(Some(observation)) => observation,
                Ok(None) => {
                    attempts.push(MethodAttempt {
                        method,
                        succeeded: false,
                        detail: "not applicable".to_string(),
                    });
                    continue;
                }
                Err(e) if e.is_session_failure() => return Err(e),
                Err(e) => {
                    debug!(?method, error = %e, "verification method failed");
                    attempts.push(MethodAttempt {
                        method,
                        succeeded: false,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            let judgement = spec.kind.judge(method, observation);
            let (succeeded, reason) = match judgement {
                Judgement::Pass(reason) => (true, reason),
                Judgement::Fail(reason) | Judgement::Stop(reason) => (false, reason),
            };
            attempts.push(MethodAttempt {
                method,
                succeeded,
                detail: reason.to_string(),
            });
            if matches!(observation, Observation::Present { .. }) && present_reason.is_none() {
                present_reason = Some(reason);
            }
            last_reason = reason;

            match judgement {
                Judgement::Pass(reason) => {
                    info!(kind = %spec.kind, %locator, ?method, reason, "verified");
                    return Ok(VerificationResult {
                        verified: true,
                        methods_tried: attempts,
                        details: VerificationDetails {
                            reason: reason.to_string(),
                            matched_by: Some(method),
                            locator,
                        },
                    });
                }
                Judgement::Stop(_) => break,
                Judgement::Fail(_) => {}
            }
        }

        // Seeing the element at all says more than later misses.
        let reason = present_reason.unwrap_or(last_reason);
        info!(kind = %spec.kind, %locator, reason, "verification failed");
        Ok(VerificationResult {
            verified: false,
            methods_tried: attempts,
            details: VerificationDetails {
                reason: reason.to_string(),
                matched_by: None,
                locator,
            },
        })
    }

    /// `Ok(None)` when the method has nothing to go on.
    async fn observe(
        &self,
        method: VerifyMethod,
        spec: &VerificationSpec,
        locator: &LocatorSpec,
        options: &VerifyOptions,
    ) -> Result<Option<Observation>> {
        match method {
            VerifyMethod::Direct => {
                let probe = self.finder.probe(locator).await?;
                Ok(Some(probe.as_ref().into()))
            }
            VerifyMethod::AlternativeStrategy => {
                let alternatives = self.alternatives(spec, locator).await?;
                if alternatives.is_empty() {
                    return Ok(None);
                }
                let mut observation = Observation::Absent;
                for alternative in &alternatives {
                    if let Some(probe) = self.finder.probe(alternative).await? {
                        debug!(%alternative, "alternative locator resolved");
                        observation = Some(&probe).into();
                        break;
                    }
                }
                Ok(Some(observation))
            }
            VerifyMethod::ScrollAssisted => {
                let max_attempts = options
                    .max_scroll_attempts
                    .unwrap_or(self.scroller.config().max_attempts);
                self.scroller
                    .scroll_until_found(locator, options.scroll_direction, max_attempts, None)
                    .await?;
                let probe = self.finder.probe(locator).await?;
                Ok(Some(probe.as_ref().into()))
            }
            VerifyMethod::TreeSearch => {
                let tree = self
                    .finder
                    .driver()
                    .get_accessibility_tree()
                    .await
                    .map_err(|e| EngineError::driver("get_accessibility_tree", e))?;
                Ok(Some(search_tree(&tree, &spec.selector)))
            }
        }
    }

    /// Locators for tree records carrying the selector, other than the one
    /// already tried.
    async fn alternatives(&self, spec: &VerificationSpec, tried: &LocatorSpec) -> Result<Vec<LocatorSpec>> {
        let tree = self
            .finder
            .driver()
            .get_accessibility_tree()
            .await
            .map_err(|e| EngineError::driver("get_accessibility_tree", e))?;

        let mut locators: Vec<LocatorSpec> = Vec::new();
        for record in parse_records(&tree) {
            if !record.matches_selector(&spec.selector) {
                continue;
            }
            let locator = record.locator();
            if locator != *tried && !locators.contains(&locator) {
                locators.push(locator);
            }
        }
        Ok(locators)
    }
}

/// Substring search over every identifying attribute in the tree. Values are
/// compared after entity decoding, so `Terms & Conditions` matches
/// `Terms &amp; Conditions`. An exact identifier match wins over a partial one.
fn search_tree(tree: &str, selector: &str) -> Observation {
    if selector.is_empty() {
        return Observation::Absent;
    }
    let records = parse_records(tree);
    let record = records
        .iter()
        .find(|r| r.matches_selector(selector))
        .or_else(|| {
            records
                .iter()
                .find(|r| r.identifiers().any(|v| v.contains(selector)))
        });
    record.map_or(Observation::Absent, |r| Observation::Present {
        displayed: r.displayed,
        enabled: r.enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrollConfig;
    use crate::mock::MockDriver;
    use crate::platform::Platform;

    const FORM: &str = r#"<hierarchy>
  <android.widget.Button resource-id="btn_submit" text="Submit" enabled="true" bounds="[0,1500][1080,1620]"/>
  <android.widget.Button resource-id="pay_button" text="Pay" enabled="false" bounds="[0,1700][1080,1800]"/>
  <android.widget.TextView text="Order Total: $5.00" bounds="[0,200][1080,260]"/>
  <android.widget.TextView resource-id="spinner" displayed="false" bounds="[0,0][10,10]"/>
</hierarchy>"#;

    fn engine(driver: Arc<MockDriver>) -> VerificationEngine {
        let config = EngineConfig {
            scroll: ScrollConfig {
                settle_delay_ms: 0,
                final_lookup_delay_ms: 0,
                ..ScrollConfig::default()
            },
            ..EngineConfig::default()
        };
        VerificationEngine::from_config(driver, PlatformContext::new(Platform::Android), &config)
    }

    async fn verify(driver: Arc<MockDriver>, spec: VerificationSpec) -> VerificationResult {
        engine(driver)
            .verify(&spec, &VerifyOptions::default())
            .await
            .unwrap()
    }

    fn methods(result: &VerificationResult) -> Vec<VerifyMethod> {
        result.methods_tried.iter().map(|m| m.method).collect()
    }

    #[tokio::test]
    async fn test_hidden_when_absent() {
        let result = verify(
            Arc::new(MockDriver::with_tree(FORM)),
            VerificationSpec::new(VerificationType::ElementHidden, "loading_overlay"),
        )
        .await;
        assert!(result.verified);
        assert_eq!(result.details.reason, "not_found");
        assert_eq!(methods(&result), vec![VerifyMethod::Direct]);
    }

    #[tokio::test]
    async fn test_hidden_when_not_displayed() {
        let result = verify(
            Arc::new(MockDriver::with_tree(FORM)),
            VerificationSpec::new(VerificationType::ElementHidden, "spinner"),
        )
        .await;
        assert!(result.verified);
        assert_eq!(result.details.reason, "not_displayed");
    }

    #[tokio::test]
    async fn test_visible_element_is_not_hidden() {
        let result = verify(
            Arc::new(MockDriver::with_tree(FORM)),
            VerificationSpec::new(VerificationType::ElementHidden, "btn_submit"),
        )
        .await;
        assert!(!result.verified);
        assert_eq!(result.details.reason, "visible");
        assert_eq!(result.methods_tried.len(), 1);
    }

    #[tokio::test]
    async fn test_visible_through_alternative_locator() {
        let result = verify(
            Arc::new(MockDriver::with_tree(FORM)),
            VerificationSpec::new(VerificationType::ElementVisible, "Submit"),
        )
        .await;
        assert!(result.verified);
        assert_eq!(result.details.matched_by, Some(VerifyMethod::AlternativeStrategy));
        assert_eq!(
            methods(&result),
            vec![VerifyMethod::Direct, VerifyMethod::AlternativeStrategy]
        );
        assert!(!result.methods_tried[0].succeeded);
    }

    #[tokio::test]
    async fn test_disabled_distinguishes_missing() {
        let driver = Arc::new(MockDriver::with_tree(FORM));

        let disabled = verify(
            driver.clone(),
            VerificationSpec::new(VerificationType::ElementDisabled, "pay_button"),
        )
        .await;
        assert!(disabled.verified);
        assert_eq!(disabled.details.reason, "disabled");

        let enabled = verify(
            driver.clone(),
            VerificationSpec::new(VerificationType::ElementDisabled, "btn_submit"),
        )
        .await;
        assert!(!enabled.verified);
        assert_eq!(enabled.details.reason, "enabled");
        assert_eq!(enabled.methods_tried.len(), 1);

        let missing = verify(
            driver,
            VerificationSpec::new(VerificationType::ElementDisabled, "refund_button"),
        )
        .await;
        assert!(!missing.verified);
        assert_eq!(missing.details.reason, "element_not_found");
    }

    #[tokio::test]
    async fn test_text_present_by_tree_search() {
        let result = verify(
            Arc::new(MockDriver::with_tree(FORM)),
            VerificationSpec::new(VerificationType::TextPresent, "Total: $5"),
        )
        .await;
        assert!(result.verified);
        assert_eq!(result.details.matched_by, Some(VerifyMethod::TreeSearch));
        assert_eq!(
            methods(&result),
            vec![
                VerifyMethod::Direct,
                VerifyMethod::AlternativeStrategy,
                VerifyMethod::TreeSearch
            ]
        );
    }

    #[tokio::test]
    async fn test_text_absent_fails_when_shown() {
        let result = verify(
            Arc::new(MockDriver::with_tree(FORM)),
            VerificationSpec::new(VerificationType::TextAbsent, "Pay"),
        )
        .await;
        assert!(!result.verified);
        assert_eq!(result.details.reason, "visible");
    }

    #[tokio::test]
    async fn test_scroll_assisted_is_opt_in() {
        let hidden = r#"<hierarchy><android.widget.TextView text="top"/></hierarchy>"#.to_string();
        let driver = Arc::new(MockDriver::with_trees(vec![hidden, FORM.to_string()]));
        let spec = VerificationSpec::new(VerificationType::ElementEnabled, "btn_submit");

        let without = engine(driver.clone())
            .verify(&spec, &VerifyOptions::default())
            .await
            .unwrap();
        assert!(!without.verified);
        assert_eq!(without.details.reason, "element_not_found");
        assert_eq!(driver.gesture_count(), 0);

        let options = VerifyOptions {
            scroll: true,
            ..VerifyOptions::default()
        };
        let with = engine(driver.clone()).verify(&spec, &options).await.unwrap();
        assert!(with.verified);
        assert_eq!(with.details.matched_by, Some(VerifyMethod::ScrollAssisted));
    }

    #[tokio::test]
    async fn test_unsupported_strategy_is_an_error() {
        let spec = VerificationSpec::new(VerificationType::ElementVisible, "x")
            .with_strategy(Strategy::PlatformClassChain);
        let err = engine(Arc::new(MockDriver::with_tree(FORM)))
            .verify(&spec, &VerifyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStrategy { .. }));
    }

    #[test]
    fn test_verification_type_parsing() {
        assert_eq!(
            "element_hidden".parse::<VerificationType>().unwrap(),
            VerificationType::ElementHidden
        );
        assert!("element_sparkly".parse::<VerificationType>().is_err());

        let spec: VerificationSpec =
            serde_json::from_str(r#"{"type":"text_present","strategy":null,"selector":"Hi"}"#).unwrap();
        assert_eq!(spec.locator(), LocatorSpec::text("Hi"));
    }

    #[tokio::test]
    async fn test_text_absent_checks_substrings() {
        let driver = Arc::new(MockDriver::with_tree(FORM));

        let present = verify(
            driver.clone(),
            VerificationSpec::new(VerificationType::TextPresent, "Total"),
        )
        .await;
        assert!(present.verified);

        let absent = verify(
            driver.clone(),
            VerificationSpec::new(VerificationType::TextAbsent, "Total"),
        )
        .await;
        assert!(!absent.verified);
        assert_eq!(absent.details.reason, "visible");
        assert_eq!(methods(&absent).last(), Some(&VerifyMethod::TreeSearch));

        let gone = verify(
            driver,
            VerificationSpec::new(VerificationType::TextAbsent, "Refund issued"),
        )
        .await;
        assert!(gone.verified);
        assert_eq!(gone.details.reason, "not_found");
        assert_eq!(gone.details.matched_by, Some(VerifyMethod::TreeSearch));
    }

    #[tokio::test]
    async fn test_tree_search_decodes_entities() {
        let tree = r#"<hierarchy>
  <android.widget.CheckBox text="I accept the Terms &amp; Conditions" bounds="[0,0][1080,120]"/>
</hierarchy>"#;
        let result = verify(
            Arc::new(MockDriver::with_tree(tree)),
            VerificationSpec::new(VerificationType::TextPresent, "Terms & Conditions"),
        )
        .await;
        assert!(result.verified);
        assert_eq!(result.details.matched_by, Some(VerifyMethod::TreeSearch));
    }

    #[tokio::test]
    async fn test_session_failure_during_state_checks_is_surfaced() {
        let driver = Arc::new(MockDriver::with_tree(FORM));
        driver.fail_state_checks_with_session_error(true);

        for kind in [VerificationType::ElementHidden, VerificationType::ElementDisabled] {
            let err = engine(driver.clone())
                .verify(
                    &VerificationSpec::new(kind, "pay_button"),
                    &VerifyOptions::default(),
                )
                .await
                .unwrap_err();
            assert!(
                matches!(err, EngineError::Driver { operation: "is_displayed", .. }),
                "{kind}: {err}"
            );
        }
    }
}
