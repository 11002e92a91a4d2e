use crate::locator::Strategy;
use crate::orchestrator::FailureReport;
use crate::platform::Platform;
use thiserror::Error;

/// Failure reported by the automation driver itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("operation not supported by driver: {0}")]
    Unsupported(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("session error: {0}")]
    Session(String),
}

impl DriverError {
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, DriverError::NoSuchElement(_))
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("strategy '{strategy}' is not supported on {platform}")]
    UnsupportedStrategy { strategy: Strategy, platform: Platform },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element '{selector}' is not interactable: {reason}")]
    ElementNotInteractable { selector: String, reason: String },

    #[error("driver operation '{operation}' failed: {source}")]
    Driver {
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("analysis inconclusive: {0}")]
    AnalysisInconclusive(String),

    #[error("{0}")]
    FindAndClick(Box<FailureReport>),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn driver(operation: &'static str, source: DriverError) -> Self {
        EngineError::Driver { operation, source }
    }

    /// Interaction failures are worth one more try; caller misuse and
    /// transport problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ElementNotInteractable { .. } => true,
            EngineError::Driver { source, .. } => {
                matches!(source, DriverError::Command(_) | DriverError::NoSuchElement(_))
            }
            _ => false,
        }
    }

    /// The driver session itself is unusable; no fallback can help.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Session(_)
                | EngineError::Driver {
                    source: DriverError::Session(_),
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_strategy_message() {
        let err = EngineError::UnsupportedStrategy {
            strategy: Strategy::PlatformClassChain,
            platform: Platform::Android,
        };
        assert_eq!(
            err.to_string(),
            "strategy 'platformClassChain' is not supported on Android"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let click = EngineError::driver("click", DriverError::Command("stale".into()));
        assert!(click.is_retryable());

        let session = EngineError::driver("click", DriverError::Session("gone".into()));
        assert!(!session.is_retryable());
        assert!(session.is_session_failure());
        assert!(!click.is_session_failure());

        let not_found = EngineError::ElementNotFound("login".into());
        assert!(!not_found.is_retryable());
    }
}
