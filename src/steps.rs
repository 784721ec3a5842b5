//! Multi-pass orchestration of heterogeneous step sequences.
//!
//! [`StepOrchestrator::run`] traverses an ordered [`Step`] list up to a pass
//! budget, dispatching each step to the executor, the selection dispatcher,
//! or the validator. A matching validation sets the success flag and ends the
//! run once the current pass completes; captured text landing inside the
//! final step's stop-text set ends it as a failure. Per-step overrides rebind
//! the shared timeout and pass budget for everything that runs after them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::actions::{ActionError, ActionExecutor};
use crate::config::SessionConfig;
use crate::driver::{ContextTarget, DriverRuntime};
use crate::locator::Locator;
use crate::logging::ActionLogger;
use crate::selection::{SelectionDispatcher, SelectionError, SelectionTarget};
use crate::validate::{TextValidator, ValidateError, ValidationOutcome};
use crate::wait::{STEP_DELAY, VALIDATION_INTERVAL};

/// Pass budget used when the caller does not supply one.
pub const DEFAULT_PASSES: u32 = 3;

/// Every step kind the orchestrator can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SetText,
    SetTextAndSubmit,
    Click,
    WaitExists,
    WaitTextChanges,
    WaitTextMatches,
    Select,
    Deselect,
    SwitchContext,
    ReadText,
    ReadUrl,
    ValidateText,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::SetText => "set_text",
            StepKind::SetTextAndSubmit => "set_text_and_submit",
            StepKind::Click => "click",
            StepKind::WaitExists => "wait_exists",
            StepKind::WaitTextChanges => "wait_text_changes",
            StepKind::WaitTextMatches => "wait_text_matches",
            StepKind::Select => "select",
            StepKind::Deselect => "deselect",
            StepKind::SwitchContext => "switch_context",
            StepKind::ReadText => "read_text",
            StepKind::ReadUrl => "read_url",
            StepKind::ValidateText => "validate_text",
        }
    }
}

/// One entry of a step sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    #[serde(default)]
    pub locator: Option<Locator>,
    /// Shared text parameter: the injected value for set-text steps, the
    /// reference value for wait steps, the expected value for validation.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub selection: Option<SelectionTarget>,
    #[serde(default)]
    pub context: Option<ContextTarget>,
    #[serde(default)]
    pub stop_texts: Vec<String>,
    /// Rebinds the shared wait budget for this and every later step.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Rebinds the shared pass budget for the whole run.
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Step {
    fn of(kind: StepKind, locator: Option<Locator>) -> Self {
        Self {
            kind,
            locator,
            text: None,
            selection: None,
            context: None,
            stop_texts: Vec::new(),
            timeout: None,
            attempts: None,
            name: None,
        }
    }

    pub fn set_text(locator: impl Into<Locator>, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::of(StepKind::SetText, Some(locator.into()))
        }
    }

    pub fn set_text_and_submit(locator: impl Into<Locator>, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::of(StepKind::SetTextAndSubmit, Some(locator.into()))
        }
    }

    pub fn click(locator: impl Into<Locator>) -> Self {
        Self::of(StepKind::Click, Some(locator.into()))
    }

    pub fn wait_exists(locator: impl Into<Locator>) -> Self {
        Self::of(StepKind::WaitExists, Some(locator.into()))
    }

    pub fn wait_text_changes(locator: impl Into<Locator>, known: impl Into<String>) -> Self {
        Self {
            text: Some(known.into()),
            ..Self::of(StepKind::WaitTextChanges, Some(locator.into()))
        }
    }

    pub fn wait_text_matches(locator: impl Into<Locator>, expected: impl Into<String>) -> Self {
        Self {
            text: Some(expected.into()),
            ..Self::of(StepKind::WaitTextMatches, Some(locator.into()))
        }
    }

    pub fn select(locator: impl Into<Locator>, target: SelectionTarget) -> Self {
        Self {
            selection: Some(target),
            ..Self::of(StepKind::Select, Some(locator.into()))
        }
    }

    pub fn deselect(locator: impl Into<Locator>, target: SelectionTarget) -> Self {
        Self {
            selection: Some(target),
            ..Self::of(StepKind::Deselect, Some(locator.into()))
        }
    }

    pub fn switch_context(target: ContextTarget) -> Self {
        Self {
            context: Some(target),
            ..Self::of(StepKind::SwitchContext, None)
        }
    }

    pub fn read_text(locator: impl Into<Locator>) -> Self {
        Self::of(StepKind::ReadText, Some(locator.into()))
    }

    pub fn read_url() -> Self {
        Self::of(StepKind::ReadUrl, None)
    }

    pub fn validate_text(
        locator: impl Into<Locator>,
        expected: impl Into<String>,
        stop_texts: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            text: Some(expected.into()),
            stop_texts: stop_texts.into_iter().map(Into::into).collect(),
            ..Self::of(StepKind::ValidateText, Some(locator.into()))
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Name for logs: the explicit name, else the locator, else the kind.
    pub fn display_name(&self) -> &str {
        if let Some(name) = &self.name {
            name
        } else if let Some(locator) = &self.locator {
            locator.display_name()
        } else {
            self.kind.as_str()
        }
    }

    fn text_value(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOutcome {
    /// Text stored by the most recent validation step, if any ran.
    pub captured: Option<String>,
    pub success: bool,
}

/// How pass exhaustion is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Exhausted passes raise [`OrchestrationError::Failed`].
    #[default]
    Raise,
    /// Exhausted passes come back as a failure outcome instead.
    ReturnOutcome,
}

/// Errors surfaced by [`StepOrchestrator`].
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Every pass ran without a successful validation.
    #[error("steps did not succeed after {passes} passes over [{elements}]")]
    Failed {
        passes: u32,
        elements: String,
        observed: Option<String>,
    },
    /// The step's kind requires a locator but none was configured.
    #[error("step '{step}' ({kind}) has no locator")]
    MissingLocator { step: String, kind: &'static str },
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Validation(#[from] ValidateError),
}

/// Runs step sequences until validation succeeds, a stop state appears, or
/// the pass budget runs out.
pub struct StepOrchestrator<R> {
    executor: ActionExecutor<R>,
    selector: SelectionDispatcher<R>,
    validator: TextValidator<R>,
    logger: ActionLogger,
    step_delay: Duration,
    default_timeout: Duration,
}

impl<R: DriverRuntime> StepOrchestrator<R> {
    pub fn new(runtime: Arc<R>, logger: ActionLogger, config: &SessionConfig) -> Self {
        Self::from_parts(
            ActionExecutor::new(runtime.clone(), logger.clone(), config),
            SelectionDispatcher::new(runtime.clone(), logger.clone(), config),
            TextValidator::new(runtime, logger.clone(), config),
            logger,
            config.default_timeout,
        )
    }

    pub fn from_parts(
        executor: ActionExecutor<R>,
        selector: SelectionDispatcher<R>,
        validator: TextValidator<R>,
        logger: ActionLogger,
        default_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            selector,
            validator,
            logger,
            step_delay: STEP_DELAY,
            default_timeout,
        }
    }

    /// Override the fixed delay inserted after every step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Traverse `steps` for up to `passes` passes.
    ///
    /// The timeout and pass budgets are shared run-wide state: a step
    /// carrying an override reassigns them for every step and pass that
    /// follows. The pass counter itself is a monotone index against the
    /// mutable budget, so a persistent override can shrink or extend the run
    /// but never prevent it from terminating.
    pub async fn run(
        &self,
        steps: &[Step],
        passes: u32,
        policy: FailurePolicy,
    ) -> Result<SequenceOutcome, OrchestrationError> {
        if steps.is_empty() {
            self.logger
                .info("no steps to run", Some("steps"), None);
            return Ok(SequenceOutcome {
                captured: None,
                success: true,
            });
        }

        let initial_passes = passes.max(1);
        let mut budget = initial_passes;
        let mut timeout = self.default_timeout;
        let mut captured: Option<String> = None;
        let mut success = false;
        let mut halted = false;
        let mut pass = 0u32;
        let roster = steps
            .iter()
            .map(Step::display_name)
            .collect::<Vec<_>>()
            .join(", ");

        'passes: while pass < budget {
            pass += 1;
            self.logger.info(
                &format!("pass {pass}: running {} steps", steps.len()),
                Some("steps"),
                None,
            );

            for step in steps {
                if let Some(per_step) = step.timeout {
                    timeout = per_step;
                }
                if let Some(per_step) = step.attempts {
                    budget = per_step;
                }

                self.dispatch(step, timeout, &mut captured, &mut success)
                    .await?;
                tokio::time::sleep(self.step_delay).await;
            }

            if success {
                break 'passes;
            }

            // The final step's stop texts end the run whenever they contain
            // the captured data, no matter which step captured it.
            if let (Some(data), Some(last)) = (captured.as_deref(), steps.last()) {
                if !data.is_empty() && last.stop_texts.iter().any(|stop| stop.contains(data)) {
                    self.logger.error(
                        &format!("captured text '{data}' marks a stop state; halting"),
                        Some("steps"),
                        Some(json!({ "stop_texts": last.stop_texts })),
                    );
                    halted = true;
                    break 'passes;
                }
            }
        }

        if success {
            self.logger.info(
                &format!("steps succeeded on pass {pass}"),
                Some("steps"),
                Some(json!({ "captured": captured })),
            );
            return Ok(SequenceOutcome {
                captured,
                success: true,
            });
        }

        if halted {
            return Ok(SequenceOutcome {
                captured,
                success: false,
            });
        }

        self.logger.error(
            &format!("steps did not succeed after {initial_passes} passes over [{roster}]"),
            Some("steps"),
            Some(json!({ "captured": captured })),
        );
        match policy {
            FailurePolicy::Raise => Err(OrchestrationError::Failed {
                passes: initial_passes,
                elements: roster,
                observed: captured,
            }),
            FailurePolicy::ReturnOutcome => Ok(SequenceOutcome {
                captured,
                success: false,
            }),
        }
    }

    async fn dispatch(
        &self,
        step: &Step,
        timeout: Duration,
        captured: &mut Option<String>,
        success: &mut bool,
    ) -> Result<(), OrchestrationError> {
        self.logger.debug(
            &format!("step {} on '{}'", step.kind.as_str(), step.display_name()),
            Some("steps"),
            None,
        );
        match step.kind {
            StepKind::SetText => {
                self.executor
                    .set_text(locator_of(step)?, step.text_value(), timeout)
                    .await?;
            }
            StepKind::SetTextAndSubmit => {
                self.executor
                    .set_text_and_submit(locator_of(step)?, step.text_value(), timeout)
                    .await?;
            }
            StepKind::Click => {
                self.executor.click(locator_of(step)?, timeout).await?;
            }
            StepKind::WaitExists => {
                self.executor
                    .element_exists(locator_of(step)?, timeout)
                    .await?;
            }
            StepKind::WaitTextChanges => {
                self.validator
                    .wait_until_text_changes(locator_of(step)?, step.text_value(), timeout)
                    .await?;
            }
            StepKind::WaitTextMatches => {
                self.validator
                    .wait_until_text_matches(locator_of(step)?, step.text_value(), timeout)
                    .await?;
            }
            StepKind::Select => {
                let fallback = SelectionTarget::default();
                let target = step.selection.as_ref().unwrap_or(&fallback);
                self.selector
                    .select(locator_of(step)?, target, timeout)
                    .await?;
            }
            StepKind::Deselect => {
                let fallback = SelectionTarget::default();
                let target = step.selection.as_ref().unwrap_or(&fallback);
                self.selector
                    .deselect(locator_of(step)?, target, timeout)
                    .await?;
            }
            StepKind::SwitchContext => {
                let target = step.context.clone().unwrap_or(ContextTarget::Default);
                self.executor.switch_context(&target).await?;
            }
            StepKind::ReadText => {
                // A synchronization read; only validation writes the capture
                // slot.
                self.executor.read_text(locator_of(step)?, timeout).await?;
            }
            StepKind::ReadUrl => {
                self.executor.current_url().await?;
            }
            StepKind::ValidateText => {
                let ValidationOutcome { text, matched } = self
                    .validator
                    .validate(
                        locator_of(step)?,
                        step.text_value(),
                        &step.stop_texts,
                        timeout,
                        1,
                        VALIDATION_INTERVAL,
                    )
                    .await?;
                *captured = Some(text);
                if matched {
                    *success = true;
                }
            }
        }
        Ok(())
    }
}

fn locator_of(step: &Step) -> Result<&Locator, OrchestrationError> {
    step.locator
        .as_ref()
        .ok_or_else(|| OrchestrationError::MissingLocator {
            step: step.display_name().to_string(),
            kind: step.kind.as_str(),
        })
}
