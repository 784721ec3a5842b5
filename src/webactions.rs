//! High-level facade tying the layers together.
//!
//! [`WebActions`] owns one [`SessionManager`] plus the action, selection,
//! validation, and orchestration front-ends, all sharing a runtime and a
//! logger. Its methods take `Option<Duration>` waits and fall back to the
//! configured default, so call sites only spell a timeout when they mean to
//! override it.

use std::sync::Arc;
use std::time::Duration;

use crate::actions::{ActionError, ActionExecutor};
use crate::config::SessionConfig;
use crate::driver::{ContextTarget, DriverRuntime};
use crate::locator::Locator;
use crate::logging::{ActionLogger, LogConfig};
use crate::runtime::ChromiumoxideRuntime;
use crate::selection::{SelectionDispatcher, SelectionError, SelectionTarget};
use crate::session::{SessionError, SessionManager};
use crate::steps::{
    FailurePolicy, OrchestrationError, SequenceOutcome, Step, StepOrchestrator, DEFAULT_PASSES,
};
use crate::validate::{TextValidator, ValidateError, ValidationOutcome};
use crate::wait::{VALIDATION_ATTEMPTS, VALIDATION_INTERVAL};

/// Convenience error type surfaced by the [`WebActions`] facade.
#[derive(Debug, thiserror::Error)]
pub enum WebActionsError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Validation(#[from] ValidateError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
}

/// One browser session and every operation the toolkit offers over it.
pub struct WebActions<R: DriverRuntime> {
    runtime: Arc<R>,
    logger: ActionLogger,
    config: SessionConfig,
    session: SessionManager<R>,
    executor: ActionExecutor<R>,
    selector: SelectionDispatcher<R>,
    validator: TextValidator<R>,
    orchestrator: StepOrchestrator<R>,
}

impl WebActions<ChromiumoxideRuntime> {
    /// Construct a facade backed by the bundled chromium runtime.
    pub fn new_local(config: SessionConfig, log: LogConfig) -> Result<Self, WebActionsError> {
        let logger = ActionLogger::new(log);
        let runtime = Arc::new(ChromiumoxideRuntime::new(logger.clone()));
        Self::with_runtime(config, runtime, logger)
    }
}

impl<R: DriverRuntime> WebActions<R> {
    /// Wire every layer onto an existing runtime.
    pub fn with_runtime(
        config: SessionConfig,
        runtime: Arc<R>,
        logger: ActionLogger,
    ) -> Result<Self, WebActionsError> {
        let session = SessionManager::new(runtime.clone(), logger.clone(), &config)?;
        let executor = ActionExecutor::new(runtime.clone(), logger.clone(), &config);
        let selector = SelectionDispatcher::new(runtime.clone(), logger.clone(), &config);
        let validator = TextValidator::new(runtime.clone(), logger.clone(), &config);
        let orchestrator = StepOrchestrator::new(runtime.clone(), logger.clone(), &config);
        Ok(Self {
            runtime,
            logger,
            config,
            session,
            executor,
            selector,
            validator,
            orchestrator,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn logger(&self) -> &ActionLogger {
        &self.logger
    }

    /// Access the session layer for lifecycle tuning.
    pub fn session(&self) -> &SessionManager<R> {
        &self.session
    }

    /// Access the underlying runtime for advanced operations.
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Override the settle delay applied after each orchestrated step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.orchestrator = self.orchestrator.with_step_delay(delay);
        self
    }

    fn wait(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.config.default_timeout)
    }

    /// Launch the browser session. Idempotent.
    pub async fn launch(&self) -> Result<(), SessionError> {
        self.session.launch().await
    }

    /// Gracefully terminate the session, force-killing if the engine stays
    /// busy. Idempotent.
    pub async fn terminate(&self) -> Result<(), SessionError> {
        self.session.terminate().await
    }

    pub async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        self.executor.navigate(url).await
    }

    pub async fn current_url(&self) -> Result<String, ActionError> {
        self.executor.current_url().await
    }

    pub async fn title(&self) -> Result<String, ActionError> {
        self.executor.title().await
    }

    pub async fn click(
        &self,
        locator: &Locator,
        timeout: Option<Duration>,
    ) -> Result<bool, ActionError> {
        self.executor.click(locator, self.wait(timeout)).await
    }

    pub async fn set_text(
        &self,
        locator: &Locator,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, ActionError> {
        self.executor
            .set_text(locator, text, self.wait(timeout))
            .await
    }

    pub async fn set_text_and_submit(
        &self,
        locator: &Locator,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, ActionError> {
        self.executor
            .set_text_and_submit(locator, text, self.wait(timeout))
            .await
    }

    pub async fn clear_text(
        &self,
        locator: &Locator,
        timeout: Option<Duration>,
    ) -> Result<bool, ActionError> {
        self.executor.clear_text(locator, self.wait(timeout)).await
    }

    /// Read an element's text. `None` when the element never appeared and
    /// misses are not escalated.
    pub async fn read_text(
        &self,
        locator: &Locator,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, ActionError> {
        self.executor.read_text(locator, self.wait(timeout)).await
    }

    pub async fn element_exists(
        &self,
        locator: &Locator,
        timeout: Option<Duration>,
    ) -> Result<bool, ActionError> {
        self.executor
            .element_exists(locator, self.wait(timeout))
            .await
    }

    pub async fn switch_context(&self, target: &ContextTarget) -> Result<bool, ActionError> {
        self.executor.switch_context(target).await
    }

    pub async fn select(
        &self,
        locator: &Locator,
        target: &SelectionTarget,
        timeout: Option<Duration>,
    ) -> Result<(), SelectionError> {
        self.selector
            .select(locator, target, self.wait(timeout))
            .await
    }

    pub async fn deselect(
        &self,
        locator: &Locator,
        target: &SelectionTarget,
        timeout: Option<Duration>,
    ) -> Result<(), SelectionError> {
        self.selector
            .deselect(locator, target, self.wait(timeout))
            .await
    }

    /// Check an element's text against `expected` over the standard attempt
    /// schedule, halting early on any stop text.
    pub async fn validate_text(
        &self,
        locator: &Locator,
        expected: &str,
        stop_texts: &[String],
        timeout: Option<Duration>,
    ) -> Result<ValidationOutcome, ValidateError> {
        self.validator
            .validate(
                locator,
                expected,
                stop_texts,
                self.wait(timeout),
                VALIDATION_ATTEMPTS,
                VALIDATION_INTERVAL,
            )
            .await
    }

    /// Wait for the element's text to move away from `known`.
    pub async fn wait_until_text_changes(
        &self,
        locator: &Locator,
        known: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, ValidateError> {
        self.validator
            .wait_until_text_changes(locator, known, self.wait(timeout))
            .await
    }

    /// Wait for the element's text to equal `expected`.
    pub async fn wait_until_text_matches(
        &self,
        locator: &Locator,
        expected: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, ValidateError> {
        self.validator
            .wait_until_text_matches(locator, expected, self.wait(timeout))
            .await
    }

    /// Run a step sequence with the default pass budget, raising on
    /// exhaustion.
    pub async fn run_steps(&self, steps: &[Step]) -> Result<SequenceOutcome, OrchestrationError> {
        self.orchestrator
            .run(steps, DEFAULT_PASSES, FailurePolicy::Raise)
            .await
    }

    /// Run a step sequence with an explicit pass budget and failure policy.
    pub async fn run_steps_with(
        &self,
        steps: &[Step],
        passes: u32,
        policy: FailurePolicy,
    ) -> Result<SequenceOutcome, OrchestrationError> {
        self.orchestrator.run(steps, passes, policy).await
    }
}
