//! Accessibility tree scanning.
//!
//! Android UiAutomator2 and iOS XCUITest both serialise the screen as an
//! XML-like dump. Only start tags and their attributes matter to the engine,
//! so the tree is scanned tag by tag instead of being fully parsed; malformed
//! regions are skipped rather than failing the whole snapshot.

use crate::geometry::Rect;
use crate::locator::{LocatorSpec, Strategy};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

static START_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([A-Za-z_][\w.:\-]*)((?:\s+[\w:.\-]+\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*/?>"#)
        .expect("start tag pattern")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:.\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute pattern")
});

static ANDROID_BOUNDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*\]\s*\[\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*\]")
        .expect("bounds pattern")
});

/// One start tag from the tree, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    pub index: usize,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
}

impl RawNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value, treating empty strings as absent.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.attr(name).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.attr(name)?.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn class_name(&self) -> &str {
        self.non_empty("class")
            .or_else(|| self.non_empty("type"))
            .unwrap_or(&self.tag)
    }

    /// Pixel bounds from either `bounds="[x1,y1][x2,y2]"` or separate
    /// `x`/`y`/`width`/`height` attributes.
    pub fn bounds(&self) -> Option<Rect> {
        if let Some(raw) = self.attr("bounds") {
            let caps = ANDROID_BOUNDS.captures(raw)?;
            let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
            return Some(Rect::from_corners(n(1)?, n(2)?, n(3)?, n(4)?));
        }

        let n = |name: &str| self.attr(name).and_then(|v| v.trim().parse::<f64>().ok());
        Some(Rect::new(n("x")?, n("y")?, n("width")?, n("height")?))
    }
}

/// Scans every start tag. Returns an empty list for input that does not
/// look like a tree at all.
pub fn parse_nodes(tree: &str) -> Vec<RawNode> {
    START_TAG
        .captures_iter(tree)
        .enumerate()
        .map(|(index, caps)| {
            let tag = caps[1].to_string();
            let attributes = caps
                .get(2)
                .map(|m| {
                    ATTRIBUTE
                        .captures_iter(m.as_str())
                        .map(|a| {
                            let value = a.get(2).or_else(|| a.get(3)).map_or("", |v| v.as_str());
                            (a[1].to_string(), unescape(value))
                        })
                        .collect()
                })
                .unwrap_or_default();
            RawNode {
                index,
                tag,
                attributes,
            }
        })
        .collect()
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

/// Element extracted from one tree snapshot. Records have no identity
/// beyond the snapshot they were parsed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub tag: String,
    pub resource_id: Option<String>,
    pub content_desc: Option<String>,
    pub text: Option<String>,
    pub name: Option<String>,
    pub label: Option<String>,
    pub value: Option<String>,
    pub class_name: Option<String>,
    pub bounds: Option<Rect>,
    pub clickable: bool,
    pub enabled: bool,
    pub displayed: bool,
    pub derived_strategy: Strategy,
    pub derived_selector: String,
}

const IOS_TAPPABLE_SUFFIXES: [&str; 6] = ["Button", "Cell", "Link", "Switch", "TextField", "Tab"];

impl ElementRecord {
    fn from_node(node: &RawNode, class_occurrence: usize) -> Self {
        let owned = |name: &str| node.non_empty(name).map(str::to_string);

        let resource_id = owned("resource-id");
        let content_desc = owned("content-desc");
        let text = owned("text");
        let name = owned("name");
        let label = owned("label");
        let value = owned("value");

        let clickable = node.flag("clickable").unwrap_or_else(|| {
            node.tag.starts_with("XCUIElementType")
                && IOS_TAPPABLE_SUFFIXES
                    .iter()
                    .any(|suffix| node.tag.ends_with(suffix))
        });
        let enabled = node.flag("enabled").unwrap_or(true);
        let displayed = node
            .flag("displayed")
            .or_else(|| node.flag("visible"))
            .unwrap_or(true);

        // Most specific identifier first; the positional XPath always works.
        let (derived_strategy, derived_selector) = if let Some(n) = &name {
            (Strategy::AccessibilityId, n.clone())
        } else if let Some(id) = &resource_id {
            (Strategy::Id, id.clone())
        } else if let Some(desc) = &content_desc {
            (Strategy::ContentDescription, desc.clone())
        } else if let Some(t) = text.as_ref().or(label.as_ref()).or(value.as_ref()) {
            (Strategy::Text, t.clone())
        } else {
            (
                Strategy::Xpath,
                format!("(//{})[{}]", node.tag, class_occurrence),
            )
        };

        Self {
            tag: node.tag.clone(),
            resource_id,
            content_desc,
            text,
            name,
            label,
            value,
            class_name: Some(node.class_name().to_string()),
            bounds: node.bounds(),
            clickable,
            enabled,
            displayed,
            derived_strategy,
            derived_selector,
        }
    }

    pub fn locator(&self) -> LocatorSpec {
        LocatorSpec::new(self.derived_strategy, self.derived_selector.clone())
    }

    /// Human-visible text, whichever attribute carries it.
    pub fn visible_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.label.as_deref())
            .or(self.value.as_deref())
    }

    /// Every identifying attribute the record carries.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        [
            self.resource_id.as_deref(),
            self.content_desc.as_deref(),
            self.text.as_deref(),
            self.name.as_deref(),
            self.label.as_deref(),
            self.value.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    /// True when any identifier equals `selector`. Android resource ids also
    /// match on their unqualified suffix (`pkg:id/login` matches `login`).
    pub fn matches_selector(&self, selector: &str) -> bool {
        self.identifiers().any(|v| v == selector)
            || self
                .resource_id
                .as_deref()
                .and_then(|id| id.rsplit_once(":id/"))
                .is_some_and(|(_, short)| short == selector)
    }
}

/// Parses the tree into element records in document order.
pub fn parse_records(tree: &str) -> Vec<ElementRecord> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    parse_nodes(tree)
        .iter()
        .map(|node| {
            let count = occurrences.entry(node.tag.clone()).or_insert(0);
            *count += 1;
            ElementRecord::from_node(node, *count)
        })
        .collect()
}
