use crate::config::WaitConfig;
use crate::driver::{Driver, ElementHandle};
use crate::error::{DriverError, DriverResult, EngineError, Result};
use crate::locator::LocatorSpec;
use crate::platform::PlatformContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A resolved element together with its interactability at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementProbe {
    pub handle: ElementHandle,
    pub displayed: bool,
    pub enabled: bool,
}

impl ElementProbe {
    pub fn is_ready(&self) -> bool {
        self.displayed && self.enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Present,
    Visible,
    Enabled,
    Absent,
}

impl WaitCondition {
    fn satisfied_by(&self, probe: Option<&ElementProbe>) -> bool {
        match self {
            WaitCondition::Present => probe.is_some(),
            WaitCondition::Visible => probe.is_some_and(|p| p.displayed),
            WaitCondition::Enabled => probe.is_some_and(|p| p.displayed && p.enabled),
            WaitCondition::Absent => probe.is_none_or(|p| !p.displayed),
        }
    }
}

/// Translates locators and resolves them through the driver.
#[derive(Clone)]
pub struct ElementFinder {
    driver: Arc<dyn Driver>,
    platform: PlatformContext,
    wait: WaitConfig,
}

impl ElementFinder {
    pub fn new(driver: Arc<dyn Driver>, platform: PlatformContext, wait: WaitConfig) -> Self {
        Self {
            driver,
            platform,
            wait,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn platform(&self) -> PlatformContext {
        self.platform
    }

    /// `Ok(None)` when the element does not exist. Unsupported strategies and
    /// driver failures other than "no such element" are errors.
    pub async fn locate(&self, locator: &LocatorSpec) -> Result<Option<ElementHandle>> {
        let query = locator.translate(self.platform.platform())?;
        match self.driver.query_element(&query).await {
            Ok(handle) => Ok(Some(handle)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(EngineError::driver("query_element", e)),
        }
    }

    pub async fn find_all(&self, locator: &LocatorSpec) -> Result<Vec<ElementHandle>> {
        let query = locator.translate_many(self.platform.platform())?;
        match self.driver.query_elements(&query).await {
            Ok(handles) => Ok(handles),
            Err(e) if e.is_no_such_element() => Ok(Vec::new()),
            Err(e) => Err(EngineError::driver("query_elements", e)),
        }
    }

    pub async fn probe(&self, locator: &LocatorSpec) -> Result<Option<ElementProbe>> {
        let Some(handle) = self.locate(locator).await? else {
            return Ok(None);
        };
        Ok(Some(self.probe_handle(handle).await?))
    }

    pub async fn probe_handle(&self, handle: ElementHandle) -> Result<ElementProbe> {
        let displayed = self.is_displayed(&handle).await?;
        let enabled = self.is_enabled(&handle).await?;
        Ok(ElementProbe {
            handle,
            displayed,
            enabled,
        })
    }

    pub async fn is_displayed(&self, handle: &ElementHandle) -> Result<bool> {
        state_check("is_displayed", handle, self.driver.is_displayed(handle).await)
    }

    pub async fn is_enabled(&self, handle: &ElementHandle) -> Result<bool> {
        state_check("is_enabled", handle, self.driver.is_enabled(handle).await)
    }

    /// Present, displayed and enabled.
    pub async fn is_ready(&self, locator: &LocatorSpec) -> Result<bool> {
        Ok(self.probe(locator).await?.is_some_and(|p| p.is_ready()))
    }

    /// Polls until `condition` holds or `timeout` expires. Always checks at
    /// least once.
    pub async fn wait_for(
        &self,
        locator: &LocatorSpec,
        condition: WaitCondition,
        timeout: Option<Duration>,
    ) -> Result<Option<ElementProbe>> {
        let timeout = timeout.unwrap_or_else(|| self.wait.default_timeout());
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let probe = self.probe(locator).await?;
            if condition.satisfied_by(probe.as_ref()) {
                debug!(%locator, ?condition, polls, "wait condition satisfied");
                return Ok(probe);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Timeout(format!(
                    "{} not {:?} after {:?} ({} polls)",
                    locator, condition, timeout, polls
                )));
            }
            tokio::time::sleep(self.wait.poll_interval().min(deadline - now)).await;
        }
    }
}

/// State checks on a just-resolved element can race with re-renders, so a
/// vanished or stale element reads as "no". Anything else is the driver's
/// problem and is surfaced.
fn state_check(
    operation: &'static str,
    handle: &ElementHandle,
    result: DriverResult<bool>,
) -> Result<bool> {
    match result {
        Ok(value) => Ok(value),
        Err(e @ (DriverError::NoSuchElement(_) | DriverError::Command(_))) => {
            debug!(element = %handle.id, operation, error = %e, "state check failed");
            Ok(false)
        }
        Err(e) => Err(EngineError::driver(operation, e)),
    }
}
