use crate::geometry::Rect;
use crate::tree::{RawNode, parse_nodes};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Priority given to elements that only carry a generic scrollable marker.
pub const GENERIC_SCROLLABLE_PRIORITY: i32 = 100;

/// Known scrollable types, best first within each platform.
const CONTAINER_CATALOG: &[(&str, i32)] = &[
    // iOS
    ("XCUIElementTypeScrollView", 1),
    ("XCUIElementTypeTable", 2),
    ("XCUIElementTypeCollectionView", 3),
    ("UIAScrollView", 4),
    ("UIATableView", 5),
    ("UIACollectionView", 6),
    // Android
    ("androidx.recyclerview.widget.RecyclerView", 1),
    ("android.support.v7.widget.RecyclerView", 2),
    ("androidx.core.widget.NestedScrollView", 3),
    ("android.support.v4.widget.NestedScrollView", 4),
    ("android.widget.ScrollView", 5),
    ("android.widget.HorizontalScrollView", 6),
    ("android.widget.ListView", 7),
    ("android.widget.GridView", 8),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollableContainer {
    pub kind: String,
    pub bounds: Option<Rect>,
    /// Lower wins.
    pub priority: i32,
    pub element_id_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollableContainerDetector;

impl ScrollableContainerDetector {
    pub fn new() -> Self {
        Self
    }

    /// Picks the most relevant scrollable region of `tree`, or `None` when
    /// the tree has none or cannot be read.
    pub fn detect(&self, tree: &str) -> Option<ScrollableContainer> {
        let nodes = parse_nodes(tree);
        if nodes.is_empty() {
            return None;
        }

        // (priority, lacks explicit flag, document index) orders candidates.
        let mut best: Option<((i32, bool, usize), &RawNode, &str)> = None;
        for node in &nodes {
            let Some((kind, priority)) = catalog_match(node) else {
                continue;
            };
            let key = (priority, node.flag("scrollable") != Some(true), node.index);
            if best.as_ref().is_none_or(|(best_key, _, _)| key < *best_key) {
                best = Some((key, node, kind));
            }
        }

        if let Some(((priority, _, _), node, kind)) = best {
            let container = build(node, kind, priority);
            debug!(kind = %container.kind, priority, "detected scrollable container");
            return Some(container);
        }

        let generic = nodes
            .iter()
            .find(|node| node.flag("scrollable") == Some(true))?;
        let container = build(generic, generic.class_name(), GENERIC_SCROLLABLE_PRIORITY);
        debug!(kind = %container.kind, "falling back to generic scrollable element");
        Some(container)
    }
}

fn catalog_match(node: &RawNode) -> Option<(&'static str, i32)> {
    let class = node.class_name();
    CONTAINER_CATALOG
        .iter()
        .find(|(kind, _)| node.tag == *kind || class == *kind)
        .copied()
}

fn build(node: &RawNode, kind: &str, priority: i32) -> ScrollableContainer {
    ScrollableContainer {
        kind: kind.to_string(),
        bounds: node.bounds(),
        priority,
        element_id_hint: node
            .non_empty("resource-id")
            .or_else(|| node.non_empty("name"))
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert_eq, proptest};

    #[test]
    fn test_prefers_recycler_over_legacy_scroll_view() {
        let tree = r#"<hierarchy>
  <android.widget.ScrollView class="android.widget.ScrollView" scrollable="true" bounds="[0,0][1080,1920]">
    <androidx.recyclerview.widget.RecyclerView class="androidx.recyclerview.widget.RecyclerView" resource-id="com.app:id/list" bounds="[0,300][1080,1500]"/>
  </android.widget.ScrollView>
</hierarchy>"#;
        let container = ScrollableContainerDetector::new().detect(tree).unwrap();
        assert_eq!(container.kind, "androidx.recyclerview.widget.RecyclerView");
        assert_eq!(container.priority, 1);
        assert_eq!(container.bounds, Some(Rect::new(0.0, 300.0, 1080.0, 1200.0)));
        assert_eq!(container.element_id_hint.as_deref(), Some("com.app:id/list"));
    }

    #[test]
    fn test_explicit_flag_wins_at_same_priority() {
        let tree = r#"<hierarchy>
  <android.widget.ListView class="android.widget.ListView" bounds="[0,0][100,100]"/>
  <android.widget.ListView class="android.widget.ListView" scrollable="true" bounds="[0,200][100,400]"/>
</hierarchy>"#;
        let container = ScrollableContainerDetector::new().detect(tree).unwrap();
        assert_eq!(container.bounds, Some(Rect::new(0.0, 200.0, 100.0, 200.0)));
    }

    #[test]
    fn test_ios_table_with_separate_bounds() {
        let tree = r#"<AppiumAUT>
  <XCUIElementTypeTable type="XCUIElementTypeTable" name="feed" x="0" y="88" width="390" height="700"/>
  <XCUIElementTypeCollectionView type="XCUIElementTypeCollectionView" x="0" y="0" width="390" height="80"/>
</AppiumAUT>"#;
        let container = ScrollableContainerDetector::new().detect(tree).unwrap();
        assert_eq!(container.kind, "XCUIElementTypeTable");
        assert_eq!(container.bounds, Some(Rect::new(0.0, 88.0, 390.0, 700.0)));
        assert_eq!(container.element_id_hint.as_deref(), Some("feed"));
    }

    #[test]
    fn test_generic_scrollable_fallback() {
        let tree = r#"<hierarchy>
  <com.vendor.FancyPager class="com.vendor.FancyPager" scrollable="true" bounds="[0,100][1080,900]"/>
</hierarchy>"#;
        let container = ScrollableContainerDetector::new().detect(tree).unwrap();
        assert_eq!(container.kind, "com.vendor.FancyPager");
        assert_eq!(container.priority, GENERIC_SCROLLABLE_PRIORITY);
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let detector = ScrollableContainerDetector::new();
        assert!(detector.detect("").is_none());
        assert!(detector.detect("<<<garbage").is_none());
        assert!(detector
            .detect(r#"<hierarchy><android.widget.Button scrollable="false"/></hierarchy>"#)
            .is_none());
    }

    proptest! {
        #[test]
        fn prop_detect_is_pure(flags in proptest::collection::vec(any::<bool>(), 0..6)) {
            let body: String = flags
                .iter()
                .enumerate()
                .map(|(i, f)| format!(
                    r#"<android.widget.ListView scrollable="{}" bounds="[0,{}][100,{}]"/>"#,
                    f, i * 100, i * 100 + 50
                ))
                .collect();
            let tree = format!("<hierarchy>{}</hierarchy>", body);
            let detector = ScrollableContainerDetector::new();
            prop_assert_eq!(detector.detect(&tree), detector.detect(&tree));
        }
    }
}
