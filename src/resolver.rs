//! Bounded-wait element resolution.
//!
//! [`ElementResolver::resolve`] turns a locator into zero-or-one live
//! [`ElementHandle`] within a time budget, probing the driver every
//! [`POLL_INTERVAL`]. A miss is an ordinary outcome: by default it comes back
//! as `Ok(None)` after the budget runs out, and escalates to
//! [`ResolveError::ElementNotFound`] only when the instance default or the
//! call-scoped [`Escalation`] says so.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::driver::{DriverError, DriverRuntime, ElementHandle};
use crate::locator::Locator;
use crate::logging::ActionLogger;
use crate::wait::{poll_until, PollState, TimeBudget, POLL_INTERVAL};

/// Call-scoped control over how a resolution miss is reported. The call's
/// choice always wins over the instance default, and because it is threaded
/// as a parameter the default is untouched on every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escalation {
    /// Follow the instance-wide default.
    #[default]
    Inherit,
    /// Report a miss as [`ResolveError::ElementNotFound`].
    Escalate,
    /// Report a miss as an absent result.
    Suppress,
}

/// Errors surfaced by [`ElementResolver`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("element not found: {name} (waited {waited_secs}s)")]
    ElementNotFound { name: String, waited_secs: u64 },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Resolves locators against the element tree under a time budget.
pub struct ElementResolver<R> {
    runtime: Arc<R>,
    logger: ActionLogger,
    escalate_default: bool,
    poll_interval: Duration,
}

impl<R: DriverRuntime> ElementResolver<R> {
    pub fn new(runtime: Arc<R>, logger: ActionLogger, escalate_default: bool) -> Self {
        Self {
            runtime,
            logger,
            escalate_default,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the probe interval. Mainly for tests and unusually fast or
    /// slow element trees.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The instance-wide escalation default this resolver was built with.
    pub fn escalates_by_default(&self) -> bool {
        self.escalate_default
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Resolve within a fresh budget of `timeout`.
    pub async fn resolve(
        &self,
        locator: &Locator,
        timeout: Duration,
        require_interactable: bool,
        escalation: Escalation,
    ) -> Result<Option<ElementHandle>, ResolveError> {
        let budget = TimeBudget::new(timeout);
        self.resolve_within(locator, &budget, require_interactable, escalation)
            .await
    }

    /// Resolve against an existing budget. Retry loops share one budget across
    /// repeated resolutions so the caller's timeout is never multiplied.
    pub async fn resolve_within(
        &self,
        locator: &Locator,
        budget: &TimeBudget,
        require_interactable: bool,
        escalation: Escalation,
    ) -> Result<Option<ElementHandle>, ResolveError> {
        let state = poll_until(budget, self.poll_interval, || {
            self.probe(locator, require_interactable)
        })
        .await?;

        match state {
            PollState::Succeeded(handle) => {
                self.logger.debug(
                    &format!("resolved {}", locator.display_name()),
                    Some("resolver"),
                    Some(json!({
                        "locator": locator.raw(),
                        "strategy": locator.strategy().as_str(),
                        "handle": handle.id(),
                    })),
                );
                Ok(Some(handle))
            }
            PollState::Polling | PollState::TimedOut => {
                let waited_secs = budget.timeout().as_secs();
                self.logger.error(
                    &format!("element not found: {}", locator.display_name()),
                    Some("resolver"),
                    Some(json!({
                        "locator": locator.raw(),
                        "strategy": locator.strategy().as_str(),
                        "waited_secs": waited_secs,
                        "require_interactable": require_interactable,
                    })),
                );
                let escalate = match escalation {
                    Escalation::Inherit => self.escalate_default,
                    Escalation::Escalate => true,
                    Escalation::Suppress => false,
                };
                if escalate {
                    Err(ResolveError::ElementNotFound {
                        name: locator.display_name().to_string(),
                        waited_secs,
                    })
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Boolean presence probe. Never escalates, regardless of the instance
    /// default.
    pub async fn exists(&self, locator: &Locator, timeout: Duration) -> Result<bool, ResolveError> {
        let handle = self
            .resolve(locator, timeout, false, Escalation::Suppress)
            .await?;
        Ok(handle.is_some())
    }

    async fn probe(
        &self,
        locator: &Locator,
        require_interactable: bool,
    ) -> Result<PollState<ElementHandle>, DriverError> {
        match self.runtime.find(locator, require_interactable).await {
            Ok(Some(handle)) => Ok(PollState::Succeeded(handle)),
            Ok(None) => Ok(PollState::Polling),
            // A probe racing a tree mutation is indistinguishable from the
            // element not being there yet; keep polling.
            Err(err) if err.is_transient() => Ok(PollState::Polling),
            Err(err) => Err(err),
        }
    }
}
