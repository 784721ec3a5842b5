//! Select and deselect dispatch for option-bearing elements.
//!
//! [`SelectionDispatcher`] validates the caller's addressing method before any
//! tree work, resolves the element, and routes to the driver's select or
//! deselect primitive. Failures fold into [`SelectionError::SelectionNotFound`]
//! carrying the element, the method, and the sought value.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::driver::{DriverError, DriverRuntime, SelectionMethod};
use crate::locator::Locator;
use crate::logging::ActionLogger;
use crate::resolver::{ElementResolver, Escalation, ResolveError};

/// Whether an option is being turned on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionAction {
    Select,
    Deselect,
}

impl SelectionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionAction::Select => "select",
            SelectionAction::Deselect => "deselect",
        }
    }
}

/// Caller-facing bundle of the three option addressing methods. At most one
/// is expected; when several are set the first in index, label, value order
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionTarget {
    pub index: Option<u32>,
    pub label: Option<String>,
    pub value: Option<String>,
}

impl SelectionTarget {
    pub fn by_index(index: u32) -> Self {
        Self {
            index: Some(index),
            ..Self::default()
        }
    }

    pub fn by_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn by_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// The concrete method to dispatch, or `None` when nothing was supplied.
    pub fn choice(&self) -> Option<SelectionMethod> {
        if let Some(index) = self.index {
            Some(SelectionMethod::Index(index))
        } else if let Some(label) = &self.label {
            Some(SelectionMethod::Label(label.clone()))
        } else {
            self.value.clone().map(SelectionMethod::Value)
        }
    }
}

/// Errors surfaced by [`SelectionDispatcher`].
#[derive(Debug, Error)]
pub enum SelectionError {
    /// None of index, label, or value was supplied. Raised before any
    /// resolution work so a misconfigured step does not burn its timeout.
    #[error("no selection method provided for '{name}': give an index, label, or value")]
    ParameterMissing { name: String },
    #[error("could not {action} option by {method} '{choice}' on '{name}'")]
    SelectionNotFound {
        name: String,
        action: &'static str,
        method: &'static str,
        choice: String,
        #[source]
        source: Option<DriverError>,
    },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Performs select/deselect operations against resolved elements.
pub struct SelectionDispatcher<R> {
    resolver: ElementResolver<R>,
    logger: ActionLogger,
}

impl<R: DriverRuntime> SelectionDispatcher<R> {
    pub fn new(runtime: Arc<R>, logger: ActionLogger, config: &SessionConfig) -> Self {
        let resolver = ElementResolver::new(runtime, logger.clone(), config.escalate_missing);
        Self::from_resolver(resolver, logger)
    }

    pub fn from_resolver(resolver: ElementResolver<R>, logger: ActionLogger) -> Self {
        Self { resolver, logger }
    }

    pub async fn select(
        &self,
        locator: &Locator,
        target: &SelectionTarget,
        timeout: Duration,
    ) -> Result<(), SelectionError> {
        self.perform(locator, SelectionAction::Select, target, timeout)
            .await
    }

    pub async fn deselect(
        &self,
        locator: &Locator,
        target: &SelectionTarget,
        timeout: Duration,
    ) -> Result<(), SelectionError> {
        self.perform(locator, SelectionAction::Deselect, target, timeout)
            .await
    }

    pub async fn perform(
        &self,
        locator: &Locator,
        action: SelectionAction,
        target: &SelectionTarget,
        timeout: Duration,
    ) -> Result<(), SelectionError> {
        let Some(method) = target.choice() else {
            let name = locator.display_name().to_string();
            self.logger.error(
                &format!("no selection method provided for '{name}'"),
                Some("selection"),
                Some(json!({ "locator": locator.raw(), "action": action.as_str() })),
            );
            return Err(SelectionError::ParameterMissing { name });
        };

        // A resolution miss is a selection failure, not an element-not-found
        // escalation, so the instance default is bypassed here.
        let Some(handle) = self
            .resolver
            .resolve(locator, timeout, true, Escalation::Suppress)
            .await?
        else {
            return Err(self.not_found(locator, action, &method, None));
        };

        let outcome = match action {
            SelectionAction::Select => self.runtime().select_option(&handle, &method).await,
            SelectionAction::Deselect => self.runtime().deselect_option(&handle, &method).await,
        };
        match outcome {
            Ok(()) => {
                self.logger.debug(
                    &format!(
                        "{}ed option by {} '{}' on '{}'",
                        action.as_str(),
                        method.kind(),
                        method.describe(),
                        locator.display_name()
                    ),
                    Some("selection"),
                    None,
                );
                Ok(())
            }
            Err(source) => Err(self.not_found(locator, action, &method, Some(source))),
        }
    }

    fn runtime(&self) -> &Arc<R> {
        self.resolver.runtime()
    }

    fn not_found(
        &self,
        locator: &Locator,
        action: SelectionAction,
        method: &SelectionMethod,
        source: Option<DriverError>,
    ) -> SelectionError {
        self.logger.error(
            &format!(
                "could not {} option by {} '{}' on '{}'",
                action.as_str(),
                method.kind(),
                method.describe(),
                locator.display_name()
            ),
            Some("selection"),
            Some(json!({
                "locator": locator.raw(),
                "method": method.kind(),
                "choice": method.describe(),
                "error": source.as_ref().map(|err| err.to_string()),
            })),
        );
        SelectionError::SelectionNotFound {
            name: locator.display_name().to_string(),
            action: action.as_str(),
            method: method.kind(),
            choice: method.describe(),
            source,
        }
    }
}
