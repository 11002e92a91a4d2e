use crate::error::{EngineError, Result};
use crate::platform::{Cardinality, Platform};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    Id,
    Xpath,
    ClassName,
    Text,
    ContentDescription,
    AccessibilityId,
    PlatformClassChain,
    PlatformPredicate,
}

impl Strategy {
    pub const ALL: [Strategy; 8] = [
        Strategy::Id,
        Strategy::Xpath,
        Strategy::ClassName,
        Strategy::Text,
        Strategy::ContentDescription,
        Strategy::AccessibilityId,
        Strategy::PlatformClassChain,
        Strategy::PlatformPredicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Id => "id",
            Strategy::Xpath => "xpath",
            Strategy::ClassName => "className",
            Strategy::Text => "text",
            Strategy::ContentDescription => "contentDescription",
            Strategy::AccessibilityId => "accessibilityId",
            Strategy::PlatformClassChain => "platformClassChain",
            Strategy::PlatformPredicate => "platformPredicate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized locator strategy: {0}")]
pub struct ParseStrategyError(pub String);

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let strategy = match s.trim() {
            "id" => Strategy::Id,
            "xpath" => Strategy::Xpath,
            "className" | "class_name" | "class name" => Strategy::ClassName,
            "text" => Strategy::Text,
            "contentDescription" | "content_description" | "content-desc" => {
                Strategy::ContentDescription
            }
            "accessibilityId" | "accessibility_id" | "accessibility id" => {
                Strategy::AccessibilityId
            }
            "platformClassChain" | "-ios class chain" => Strategy::PlatformClassChain,
            "platformPredicate" | "-ios predicate string" => Strategy::PlatformPredicate,
            other => return Err(ParseStrategyError(other.to_string())),
        };
        Ok(strategy)
    }
}

/// Caller-supplied description of which element to locate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocatorSpec {
    pub strategy: Strategy,
    pub selector: String,
}

impl LocatorSpec {
    pub fn new(strategy: Strategy, selector: impl Into<String>) -> Self {
        Self {
            strategy,
            selector: selector.into(),
        }
    }

    pub fn id(selector: impl Into<String>) -> Self {
        Self::new(Strategy::Id, selector)
    }

    pub fn text(selector: impl Into<String>) -> Self {
        Self::new(Strategy::Text, selector)
    }

    pub fn translate(&self, platform: Platform) -> Result<QueryExpression> {
        translate(platform, self.strategy, &self.selector)
    }

    pub fn translate_many(&self, platform: Platform) -> Result<QueryExpression> {
        translate_many(platform, self.strategy, &self.selector)
    }
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy, self.selector)
    }
}

/// Platform-specific query in the driver's locator vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "using", content = "value")]
pub enum QueryExpression {
    Id(String),
    XPath(String),
    ClassName(String),
    AccessibilityId(String),
    ClassChain(String),
    Predicate(String),
}

impl QueryExpression {
    /// WebDriver `using` keyword for this query.
    pub fn using(&self) -> &'static str {
        match self {
            QueryExpression::Id(_) => "id",
            QueryExpression::XPath(_) => "xpath",
            QueryExpression::ClassName(_) => "class name",
            QueryExpression::AccessibilityId(_) => "accessibility id",
            QueryExpression::ClassChain(_) => "-ios class chain",
            QueryExpression::Predicate(_) => "-ios predicate string",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            QueryExpression::Id(v)
            | QueryExpression::XPath(v)
            | QueryExpression::ClassName(v)
            | QueryExpression::AccessibilityId(v)
            | QueryExpression::ClassChain(v)
            | QueryExpression::Predicate(v) => v,
        }
    }
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.using(), self.value())
    }
}

/// Translates a single-element lookup into the platform's query vocabulary.
pub fn translate(platform: Platform, strategy: Strategy, selector: &str) -> Result<QueryExpression> {
    translate_with(platform, strategy, selector, Cardinality::Single)
}

/// Translation used when enumerating every matching element. On Android the
/// `text` strategy also matches `content-desc` here.
// TODO: product review of the Android single vs. plural `text` asymmetry.
pub fn translate_many(
    platform: Platform,
    strategy: Strategy,
    selector: &str,
) -> Result<QueryExpression> {
    translate_with(platform, strategy, selector, Cardinality::Many)
}

fn translate_with(
    platform: Platform,
    strategy: Strategy,
    selector: &str,
    cardinality: Cardinality,
) -> Result<QueryExpression> {
    let dialect = platform.dialect();
    if !dialect.supports(strategy) {
        return Err(EngineError::UnsupportedStrategy { strategy, platform });
    }

    let expression = match strategy {
        Strategy::Id => QueryExpression::Id(selector.to_string()),
        Strategy::Xpath => QueryExpression::XPath(selector.to_string()),
        Strategy::ClassName => QueryExpression::ClassName(selector.to_string()),
        Strategy::Text => dialect.translate_text(selector, cardinality),
        Strategy::ContentDescription => dialect.translate_content_description(selector),
        Strategy::AccessibilityId => QueryExpression::AccessibilityId(selector.to_string()),
        Strategy::PlatformClassChain => QueryExpression::ClassChain(selector.to_string()),
        Strategy::PlatformPredicate => QueryExpression::Predicate(selector.to_string()),
    };
    Ok(expression)
}

/// Quotes `value` as an XPath 1.0 string literal.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        format!("\"{}\"", value)
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        let parts: Vec<String> = value
            .split('"')
            .map(|part| format!("\"{}\"", part))
            .collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}
