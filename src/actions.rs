//! Atomic element actions.
//!
//! [`ActionExecutor`] performs one action per call against a freshly resolved
//! element. Clicking is retry-protected: transient interference (an overlay
//! intercepting the click, a handle going stale mid-flight) triggers
//! re-resolution and another attempt every [`crate::wait::POLL_INTERVAL`]
//! until the shared budget runs out. Non-transient faults are logged and
//! swallowed into a `false` outcome unless the instance is configured to
//! propagate them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::driver::{ContextTarget, DriverError, DriverRuntime};
use crate::locator::Locator;
use crate::logging::ActionLogger;
use crate::resolver::{ElementResolver, Escalation, ResolveError};
use crate::wait::{poll_until, PollState, TimeBudget};

/// Errors surfaced by [`ActionExecutor`].
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The budget ran out while retrying transient interference.
    #[error("{action} timed out on '{name}' after {waited_secs}s")]
    TimedOut {
        action: &'static str,
        name: String,
        waited_secs: u64,
    },
    /// A non-transient fault, escalated because the instance propagates.
    #[error("{action} failed on '{name}'")]
    Element {
        action: &'static str,
        name: String,
        #[source]
        source: DriverError,
    },
    /// A session-level driver failure outside any element interaction.
    #[error(transparent)]
    Driver(DriverError),
}

/// Executes atomic actions against resolved elements.
pub struct ActionExecutor<R> {
    resolver: ElementResolver<R>,
    logger: ActionLogger,
    propagate_faults: bool,
    retry_interval: Duration,
}

impl<R: DriverRuntime> ActionExecutor<R> {
    pub fn new(runtime: Arc<R>, logger: ActionLogger, config: &SessionConfig) -> Self {
        let resolver = ElementResolver::new(runtime, logger.clone(), config.escalate_missing);
        Self::from_resolver(resolver, logger, config.propagate_action_faults)
    }

    /// Build from an existing resolver, inheriting its poll interval as the
    /// click retry interval.
    pub fn from_resolver(
        resolver: ElementResolver<R>,
        logger: ActionLogger,
        propagate_faults: bool,
    ) -> Self {
        let retry_interval = resolver.poll_interval();
        Self {
            resolver,
            logger,
            propagate_faults,
            retry_interval,
        }
    }

    pub fn resolver(&self) -> &ElementResolver<R> {
        &self.resolver
    }

    fn runtime(&self) -> &Arc<R> {
        self.resolver.runtime()
    }

    /// Click the element, requiring interactability. Transient faults retry
    /// resolution+click on the same budget; exhaustion fails as
    /// [`ActionError::TimedOut`].
    pub async fn click(&self, locator: &Locator, timeout: Duration) -> Result<bool, ActionError> {
        let budget = TimeBudget::new(timeout);
        match poll_until(&budget, self.retry_interval, || {
            self.click_once(locator, &budget)
        })
        .await
        {
            Ok(PollState::Succeeded(())) => {
                self.logger.debug(
                    &format!("clicked '{}'", locator.display_name()),
                    Some("action"),
                    Some(json!({ "locator": locator.raw() })),
                );
                Ok(true)
            }
            Ok(_) => {
                let waited_secs = budget.timeout().as_secs();
                self.logger.error(
                    &format!("click timed out on '{}'", locator.display_name()),
                    Some("action"),
                    Some(json!({
                        "locator": locator.raw(),
                        "waited_secs": waited_secs,
                    })),
                );
                Err(ActionError::TimedOut {
                    action: "click",
                    name: locator.display_name().to_string(),
                    waited_secs,
                })
            }
            Err(ActionError::Element {
                action,
                name,
                source,
            }) => self.fault_outcome(action, &name, source),
            Err(other) => Err(other),
        }
    }

    async fn click_once(
        &self,
        locator: &Locator,
        budget: &TimeBudget,
    ) -> Result<PollState<()>, ActionError> {
        // Handles must not outlive one attempt; every retry resolves afresh.
        let handle = match self
            .resolver
            .resolve_within(locator, budget, true, Escalation::Inherit)
            .await?
        {
            Some(handle) => handle,
            None => return Ok(PollState::TimedOut),
        };
        match self.runtime().click(&handle).await {
            Ok(()) => Ok(PollState::Succeeded(())),
            Err(err) if err.is_transient() => {
                self.logger.debug(
                    &format!(
                        "transient fault clicking '{}', retrying",
                        locator.display_name()
                    ),
                    Some("action"),
                    Some(json!({ "error": err.to_string() })),
                );
                Ok(PollState::Polling)
            }
            Err(source) => Err(ActionError::Element {
                action: "click",
                name: locator.display_name().to_string(),
                source,
            }),
        }
    }

    /// Clear the element's current value, then inject `text`.
    pub async fn set_text(
        &self,
        locator: &Locator,
        text: &str,
        timeout: Duration,
    ) -> Result<bool, ActionError> {
        self.inject_text(locator, text, timeout, false, "set_text")
            .await
    }

    /// [`Self::set_text`] followed by the submit signal.
    pub async fn set_text_and_submit(
        &self,
        locator: &Locator,
        text: &str,
        timeout: Duration,
    ) -> Result<bool, ActionError> {
        self.inject_text(locator, text, timeout, true, "set_text_and_submit")
            .await
    }

    async fn inject_text(
        &self,
        locator: &Locator,
        text: &str,
        timeout: Duration,
        submit: bool,
        action: &'static str,
    ) -> Result<bool, ActionError> {
        let Some(handle) = self
            .resolver
            .resolve(locator, timeout, false, Escalation::Inherit)
            .await?
        else {
            return Ok(false);
        };

        let attempt = async {
            self.runtime().clear(&handle).await?;
            self.runtime().type_text(&handle, text).await?;
            if submit {
                self.runtime().submit(&handle).await?;
            }
            Ok::<(), DriverError>(())
        }
        .await;

        match attempt {
            Ok(()) => {
                self.logger.debug(
                    &format!("{action} on '{}'", locator.display_name()),
                    Some("action"),
                    Some(json!({ "locator": locator.raw() })),
                );
                Ok(true)
            }
            Err(source) => self.fault_outcome(action, locator.display_name(), source),
        }
    }

    /// Clear the element's value without typing anything.
    pub async fn clear_text(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<bool, ActionError> {
        let Some(handle) = self
            .resolver
            .resolve(locator, timeout, false, Escalation::Inherit)
            .await?
        else {
            return Ok(false);
        };
        match self.runtime().clear(&handle).await {
            Ok(()) => Ok(true),
            Err(source) => self.fault_outcome("clear_text", locator.display_name(), source),
        }
    }

    /// Read the element's visible text; absent element yields `None`.
    pub async fn read_text(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<String>, ActionError> {
        let Some(handle) = self
            .resolver
            .resolve(locator, timeout, false, Escalation::Inherit)
            .await?
        else {
            return Ok(None);
        };
        match self.runtime().read_text(&handle).await {
            Ok(text) => Ok(Some(text)),
            Err(source) => {
                self.fault_outcome("read_text", locator.display_name(), source)?;
                Ok(None)
            }
        }
    }

    /// Non-escalating presence probe.
    pub async fn element_exists(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<bool, ActionError> {
        Ok(self.resolver.exists(locator, timeout).await?)
    }

    pub async fn switch_context(&self, target: &ContextTarget) -> Result<bool, ActionError> {
        match self.runtime().switch_context(target).await {
            Ok(()) => {
                self.logger
                    .debug("switched context", Some("action"), Some(json!({ "target": target })));
                Ok(true)
            }
            Err(source) => {
                let name = match target {
                    ContextTarget::Default => "default content".to_string(),
                    ContextTarget::Frame(locator) => locator.display_name().to_string(),
                    ContextTarget::Window(window) => format!("window '{window}'"),
                };
                self.fault_outcome("switch_context", &name, source)
            }
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        match self.runtime().navigate(url).await {
            Ok(()) => {
                self.logger
                    .info(&format!("navigated to {url}"), Some("action"), None);
                Ok(())
            }
            Err(source) => {
                self.logger.error(
                    &format!("navigation to {url} failed"),
                    Some("action"),
                    Some(json!({ "error": source.to_string() })),
                );
                Err(ActionError::Driver(source))
            }
        }
    }

    pub async fn current_url(&self) -> Result<String, ActionError> {
        self.runtime().current_url().await.map_err(|source| {
            self.logger.error(
                "failed to read current url",
                Some("action"),
                Some(json!({ "error": source.to_string() })),
            );
            ActionError::Driver(source)
        })
    }

    pub async fn title(&self) -> Result<String, ActionError> {
        self.runtime().title().await.map_err(|source| {
            self.logger.error(
                "failed to read page title",
                Some("action"),
                Some(json!({ "error": source.to_string() })),
            );
            ActionError::Driver(source)
        })
    }

    /// Log a non-transient fault, then swallow it into `Ok(false)` or
    /// re-raise it, per the instance policy.
    fn fault_outcome(
        &self,
        action: &'static str,
        name: &str,
        source: DriverError,
    ) -> Result<bool, ActionError> {
        self.logger.error(
            &format!("{action} failed on '{name}'"),
            Some("action"),
            Some(json!({ "error": source.to_string() })),
        );
        if self.propagate_faults {
            Err(ActionError::Element {
                action,
                name: name.to_string(),
                source,
            })
        } else {
            Ok(false)
        }
    }
}
