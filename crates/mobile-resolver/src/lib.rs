//! Element resolution and interaction reliability for mobile UI automation.
//!
//! The engine turns abstract "find, click, verify" requests into driver
//! calls that survive slow renders, off-screen elements and locators that
//! only work on one platform. Everything device-specific sits behind the
//! [`Driver`] trait; sessions hand out components wired to one driver.

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod finder;
pub mod geometry;
pub mod locator;
pub mod orchestrator;
pub mod platform;
pub mod scroll;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod tree;
pub mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use analyzer::{AccessibilityCorrelationAnalyzer, AnalysisRequest, Suggestion, SuggestionMethod};
pub use capture::{AppContext, CaptureRecord, Captured, StateCaptureRing};
pub use config::EngineConfig;
pub use driver::{Driver, ElementHandle};
pub use error::{DriverError, EngineError, Result};
pub use finder::{ElementFinder, WaitCondition};
pub use geometry::{Direction, Point, Rect, ViewportSize};
pub use locator::{LocatorSpec, QueryExpression, Strategy};
pub use orchestrator::{ClickOptions, ClickOutcome, FailureReport, FindAndClickOrchestrator, Phase};
pub use platform::{Platform, PlatformContext};
pub use scroll::{AdaptiveScroller, ScrollOutcome, ScrollableContainerDetector};
pub use session::{Connector, Session};
pub use storage::{Artifact, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use verify::{VerificationEngine, VerificationResult, VerificationSpec, VerificationType, VerifyOptions};
