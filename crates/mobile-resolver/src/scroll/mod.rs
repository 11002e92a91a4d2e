//! Scrolling toward off-screen elements.

pub mod container;
pub mod scroller;

pub use container::{GENERIC_SCROLLABLE_PRIORITY, ScrollableContainer, ScrollableContainerDetector};
pub use scroller::{AdaptiveScroller, GestureKind, ScrollAttemptState, ScrollOutcome};
