use crate::error::{EngineError, Result};
use crate::geometry::ViewportSize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration. Every field has a default, so a config
/// file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scroll: ScrollConfig,
    pub click: ClickConfig,
    pub scoring: ScoringWeights,
    pub heuristics: Vec<HeuristicRule>,
    pub capture: CaptureConfig,
    pub wait: WaitConfig,
    pub session: SessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scroll: ScrollConfig::default(),
            click: ClickConfig::default(),
            scoring: ScoringWeights::default(),
            heuristics: HeuristicRule::defaults(),
            capture: CaptureConfig::default(),
            wait: WaitConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let mut config: EngineConfig = serde_json::from_str(data)?;
        if config.heuristics.is_empty() {
            config.heuristics = HeuristicRule::defaults();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scroll.max_attempts == 0 {
            return Err(EngineError::Config(
                "scroll.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.scroll.stuck_threshold == 0 {
            return Err(EngineError::Config(
                "scroll.stuck_threshold must be at least 1".to_string(),
            ));
        }
        if !(self.scroll.distance_ratio > 0.0 && self.scroll.distance_ratio <= 1.0) {
            return Err(EngineError::Config(format!(
                "scroll.distance_ratio must be in (0, 1], got {}",
                self.scroll.distance_ratio
            )));
        }
        if self.capture.capacity == 0 {
            return Err(EngineError::Config(
                "capture.capacity must be at least 1".to_string(),
            ));
        }
        if self.wait.poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "wait.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        for rule in &self.heuristics {
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(EngineError::Config(format!(
                    "heuristic '{}' has confidence outside [0, 1]",
                    rule.description
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub max_attempts: u32,
    /// Consecutive unchanged trees before the scroller gives up.
    pub stuck_threshold: u32,
    /// Fraction of the container or viewport covered by one gesture.
    pub distance_ratio: f64,
    pub edge_margin_px: f64,
    pub settle_delay_ms: u64,
    pub final_lookup_delay_ms: u64,
    pub gesture_duration_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            stuck_threshold: 5,
            distance_ratio: 0.6,
            edge_margin_px: 10.0,
            settle_delay_ms: 500,
            final_lookup_delay_ms: 1000,
            gesture_duration_ms: 300,
        }
    }
}

impl ScrollConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn final_lookup_delay(&self) -> Duration {
        Duration::from_millis(self.final_lookup_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub retry_delay_ms: u64,
    /// Coordinate fallbacks below this confidence still run but carry a warning.
    pub low_confidence_threshold: f64,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 500,
            low_confidence_threshold: 0.5,
        }
    }
}

impl ClickConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Empirical weights used by the correlation analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub exact_text: f64,
    pub partial_text: f64,
    pub content_description: f64,
    pub clickable: f64,
    pub enabled: f64,
    pub resource_id_keyword: f64,
    pub coordinate_hint: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            exact_text: 0.8,
            partial_text: 0.6,
            content_description: 0.5,
            clickable: 0.2,
            enabled: 0.1,
            resource_id_keyword: 0.3,
            coordinate_hint: 0.7,
        }
    }
}

/// Static screen position used when nothing in the tree matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicRule {
    pub keywords: Vec<String>,
    pub description: String,
    pub rel_x: f64,
    pub rel_y: f64,
    pub confidence: f64,
}

impl HeuristicRule {
    fn new(keywords: &[&str], description: &str, rel_x: f64, rel_y: f64, confidence: f64) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: description.to_string(),
            rel_x,
            rel_y,
            confidence,
        }
    }

    pub fn defaults() -> Vec<HeuristicRule> {
        vec![
            HeuristicRule::new(&["login", "sign in", "log in"], "Bottom center", 0.5, 0.8, 0.4),
            HeuristicRule::new(&["continue", "next"], "Bottom right", 0.8, 0.85, 0.3),
            HeuristicRule::new(&["close", "dismiss"], "Top right", 0.9, 0.1, 0.3),
            HeuristicRule::new(&["back"], "Top left", 0.08, 0.07, 0.25),
        ]
    }

    pub fn matches(&self, description: &str) -> bool {
        let description = description.to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| description.contains(&keyword.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub capacity: usize,
    /// Artifact path prefix handed to the storage collaborator.
    pub artifact_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            artifact_dir: PathBuf::from("captures"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub poll_interval_ms: u64,
    pub default_timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            default_timeout_ms: 5000,
        }
    }
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub keepalive_interval_ms: u64,
    /// Used when the driver cannot report a viewport.
    pub fallback_viewport: ViewportSize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 60_000,
            fallback_viewport: ViewportSize::new(1080, 1920),
        }
    }
}

impl SessionConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "scroll": { "max_attempts": 3 }, "scoring": { "clickable": 0.25 } }"#,
        )
        .unwrap();
        assert_eq!(config.scroll.max_attempts, 3);
        assert_eq!(config.scroll.stuck_threshold, 5);
        assert_eq!(config.scoring.clickable, 0.25);
        assert_eq!(config.scoring.exact_text, 0.8);
        assert_eq!(config.capture.capacity, 5);
        assert!(!config.heuristics.is_empty());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = EngineConfig::from_json_str(r#"{ "capture": { "capacity": 0 } }"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err =
            EngineConfig::from_json_str(r#"{ "scroll": { "distance_ratio": 1.5 } }"#).unwrap_err();
        assert!(err.to_string().contains("distance_ratio"));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(&path, r#"{ "wait": { "poll_interval_ms": 50 } }"#)?;

        let config = EngineConfig::load(&path)?;
        assert_eq!(config.wait.poll_interval(), Duration::from_millis(50));
        Ok(())
    }

    #[test]
    fn test_heuristic_matching_is_case_insensitive() {
        let rules = HeuristicRule::defaults();
        assert!(rules[0].matches("Login button"));
        assert!(rules[1].matches("tap NEXT"));
        assert!(!rules[2].matches("open settings"));
    }
}
