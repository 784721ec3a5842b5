//! Text validation loops.
//!
//! [`TextValidator::validate`] re-reads an element's text until it matches the
//! expected value, lands on a stop text, or the attempt budget runs out. A
//! stop text is an unrecoverable state: the loop short-circuits immediately
//! with `matched = false` instead of burning the remaining attempts. Two
//! countdown waits build on the same read primitive: divergence from a known
//! value, and convergence to an expected one.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::driver::DriverRuntime;
use crate::locator::Locator;
use crate::logging::ActionLogger;
use crate::resolver::{ElementResolver, Escalation, ResolveError};
use crate::wait::{TimeBudget, COUNTDOWN_TICK};

/// What a validation loop observed and whether it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Last text read from the element; empty when it never appeared.
    pub text: String,
    pub matched: bool,
}

/// Errors surfaced by [`TextValidator`].
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Re-reads element text under attempt and time budgets.
pub struct TextValidator<R> {
    resolver: ElementResolver<R>,
    logger: ActionLogger,
    tick: Duration,
}

impl<R: DriverRuntime> TextValidator<R> {
    pub fn new(runtime: Arc<R>, logger: ActionLogger, config: &SessionConfig) -> Self {
        let resolver = ElementResolver::new(runtime, logger.clone(), config.escalate_missing);
        Self::from_resolver(resolver, logger)
    }

    pub fn from_resolver(resolver: ElementResolver<R>, logger: ActionLogger) -> Self {
        Self {
            resolver,
            logger,
            tick: COUNTDOWN_TICK,
        }
    }

    /// Override the countdown pace of the two wait helpers.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Read the element's text until it equals `expected`, re-resolving on
    /// every attempt. Observing any member of `stop_texts` ends the loop at
    /// once with `matched = false`.
    pub async fn validate(
        &self,
        locator: &Locator,
        expected: &str,
        stop_texts: &[String],
        timeout: Duration,
        attempts: u32,
        interval: Duration,
    ) -> Result<ValidationOutcome, ValidateError> {
        let attempts = attempts.max(1);
        let mut observed = String::new();
        for attempt in 1..=attempts {
            observed = self.read_current(locator, timeout).await?;

            // Stop texts win over a match so an expected value that is also
            // a stop text still halts as unrecoverable.
            if stop_texts.iter().any(|stop| *stop == observed) {
                self.logger.error(
                    &format!(
                        "unrecoverable state reached on '{}': observed '{observed}'",
                        locator.display_name()
                    ),
                    Some("validate"),
                    Some(json!({ "locator": locator.raw(), "stop_texts": stop_texts })),
                );
                return Ok(ValidationOutcome {
                    text: observed,
                    matched: false,
                });
            }

            if observed == expected {
                self.logger.info(
                    &format!(
                        "validated '{}': observed expected text '{expected}'",
                        locator.display_name()
                    ),
                    Some("validate"),
                    None,
                );
                return Ok(ValidationOutcome {
                    text: observed,
                    matched: true,
                });
            }

            if attempt < attempts {
                self.logger.debug(
                    &format!(
                        "observed '{observed}', expected '{expected}' (attempt {attempt}/{attempts})"
                    ),
                    Some("validate"),
                    None,
                );
                tokio::time::sleep(interval).await;
            }
        }

        self.logger.error(
            &format!(
                "validation failed on '{}': expected '{expected}', last observed '{observed}'",
                locator.display_name()
            ),
            Some("validate"),
            Some(json!({ "locator": locator.raw(), "attempts": attempts })),
        );
        Ok(ValidationOutcome {
            text: observed,
            matched: false,
        })
    }

    /// Wait for the element's text to move away from `known`. The known value
    /// is confirmed first so a change is observed rather than assumed; both
    /// phases share one budget.
    pub async fn wait_until_text_changes(
        &self,
        locator: &Locator,
        known: &str,
        timeout: Duration,
    ) -> Result<bool, ValidateError> {
        let budget = TimeBudget::new(timeout);
        if !self.await_equality(locator, known, &budget).await? {
            self.logger.error(
                &format!(
                    "text on '{}' never showed '{known}' to change away from",
                    locator.display_name()
                ),
                Some("validate"),
                None,
            );
            return Ok(false);
        }

        loop {
            let observed = self.read_current(locator, Duration::ZERO).await?;
            if observed != known {
                self.logger.info(
                    &format!(
                        "text on '{}' changed from '{known}' to '{observed}'",
                        locator.display_name()
                    ),
                    Some("validate"),
                    None,
                );
                return Ok(true);
            }
            if budget.is_exhausted() {
                break;
            }
            self.logger.debug(
                &format!(
                    "waiting for '{}' to change ({}s left)",
                    locator.display_name(),
                    budget.remaining().as_secs()
                ),
                Some("validate"),
                None,
            );
            budget.tick(self.tick).await;
        }

        self.logger.error(
            &format!(
                "text on '{}' still '{known}' after {}s",
                locator.display_name(),
                timeout.as_secs()
            ),
            Some("validate"),
            None,
        );
        Ok(false)
    }

    /// Wait for the element's text to equal `expected`, checking once per
    /// countdown tick.
    pub async fn wait_until_text_matches(
        &self,
        locator: &Locator,
        expected: &str,
        timeout: Duration,
    ) -> Result<bool, ValidateError> {
        let budget = TimeBudget::new(timeout);
        let matched = self.await_equality(locator, expected, &budget).await?;
        if matched {
            self.logger.info(
                &format!("text on '{}' matches '{expected}'", locator.display_name()),
                Some("validate"),
                None,
            );
        } else {
            self.logger.error(
                &format!(
                    "text on '{}' never matched '{expected}' within {}s",
                    locator.display_name(),
                    timeout.as_secs()
                ),
                Some("validate"),
                None,
            );
        }
        Ok(matched)
    }

    /// Countdown poll until the element reads exactly `expected`, bounded by
    /// the caller's budget. Always reads at least once.
    async fn await_equality(
        &self,
        locator: &Locator,
        expected: &str,
        budget: &TimeBudget,
    ) -> Result<bool, ValidateError> {
        loop {
            let observed = self.read_current(locator, Duration::ZERO).await?;
            if observed == expected {
                return Ok(true);
            }
            if budget.is_exhausted() {
                return Ok(false);
            }
            self.logger.debug(
                &format!(
                    "waiting for '{}' to read '{expected}' ({}s left)",
                    locator.display_name(),
                    budget.remaining().as_secs()
                ),
                Some("validate"),
                None,
            );
            budget.tick(self.tick).await;
        }
    }

    /// One bounded read. An absent element reads as empty text, as does a
    /// node that went stale between resolution and the read.
    async fn read_current(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<String, ValidateError> {
        let Some(handle) = self
            .resolver
            .resolve(locator, timeout, false, Escalation::Suppress)
            .await
            .map_err(ValidateError::Resolve)?
        else {
            return Ok(String::new());
        };
        match self.resolver.runtime().read_text(&handle).await {
            Ok(text) => Ok(text),
            Err(err) if err.is_transient() => Ok(String::new()),
            Err(err) => Err(ValidateError::Resolve(ResolveError::Driver(err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, ElementHandle};
    use crate::logging::{LogConfig, LogLevel};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Driver whose element text follows a script, one entry per probe.
    /// `None` means the element is absent for that probe. The final entry is
    /// sticky so countdown loops see a stable tree.
    struct TextTree {
        script: Mutex<VecDeque<Option<String>>>,
        live: Mutex<Option<String>>,
        finds: Mutex<usize>,
    }

    impl TextTree {
        fn new(script: Vec<Option<&str>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().map(|t| t.map(str::to_owned)).collect()),
                live: Mutex::new(None),
                finds: Mutex::new(0),
            }
        }

        fn next_text(&self) -> Option<String> {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap_or(None)
            } else {
                script.front().cloned().flatten()
            }
        }

        fn finds(&self) -> usize {
            *self.finds.lock().unwrap()
        }
    }

    #[async_trait]
    impl DriverRuntime for TextTree {
        async fn find(
            &self,
            _locator: &Locator,
            _require_interactable: bool,
        ) -> Result<Option<ElementHandle>, DriverError> {
            *self.finds.lock().unwrap() += 1;
            match self.next_text() {
                Some(text) => {
                    *self.live.lock().unwrap() = Some(text);
                    Ok(Some(ElementHandle::new("node")))
                }
                None => {
                    *self.live.lock().unwrap() = None;
                    Ok(None)
                }
            }
        }

        async fn read_text(&self, _handle: &ElementHandle) -> Result<String, DriverError> {
            self.live
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| DriverError::StaleReference("no live node".into()))
        }
    }

    fn quiet_logger() -> ActionLogger {
        ActionLogger::new(LogConfig {
            verbose: LogLevel::Error,
            external: Some(Arc::new(|_| {})),
        })
    }

    fn validator(runtime: Arc<TextTree>) -> TextValidator<TextTree> {
        let resolver = ElementResolver::new(runtime, quiet_logger(), false)
            .with_poll_interval(Duration::from_millis(10));
        TextValidator::from_resolver(resolver, quiet_logger())
            .with_tick(Duration::from_millis(10))
    }

    fn stops(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn matching_text_returns_immediately() {
        let runtime = Arc::new(TextTree::new(vec![Some("done")]));
        let validator = validator(runtime.clone());

        let start = Instant::now();
        let outcome = validator
            .validate(
                &Locator::new("status"),
                "done",
                &stops(&["error"]),
                Duration::ZERO,
                3,
                Duration::from_millis(200),
            )
            .await
            .unwrap();

        assert!(outcome.matched);
        assert_eq!(outcome.text, "done");
        assert_eq!(runtime.finds(), 1);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn stop_text_short_circuits_with_attempts_remaining() {
        let runtime = Arc::new(TextTree::new(vec![Some("error")]));
        let validator = validator(runtime.clone());

        let outcome = validator
            .validate(
                &Locator::new("status"),
                "done",
                &stops(&["error"]),
                Duration::ZERO,
                3,
                Duration::from_millis(200),
            )
            .await
            .unwrap();

        assert!(!outcome.matched);
        assert_eq!(outcome.text, "error");
        assert_eq!(runtime.finds(), 1);
    }

    #[tokio::test]
    async fn stop_text_wins_over_an_identical_expected_text() {
        let runtime = Arc::new(TextTree::new(vec![Some("error")]));
        let validator = validator(runtime);

        let outcome = validator
            .validate(
                &Locator::new("status"),
                "error",
                &stops(&["error"]),
                Duration::ZERO,
                3,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        assert!(!outcome.matched);
    }

    #[tokio::test]
    async fn retries_until_the_expected_text_appears() {
        let runtime = Arc::new(TextTree::new(vec![
            Some("loading"),
            Some("loading"),
            Some("done"),
        ]));
        let validator = validator(runtime.clone());

        let outcome = validator
            .validate(
                &Locator::new("status"),
                "done",
                &stops(&["error"]),
                Duration::ZERO,
                5,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        assert!(outcome.matched);
        assert_eq!(runtime.finds(), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_observed_text() {
        let runtime = Arc::new(TextTree::new(vec![Some("loading")]));
        let validator = validator(runtime.clone());

        let outcome = validator
            .validate(
                &Locator::new("status"),
                "done",
                &[],
                Duration::ZERO,
                3,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        assert!(!outcome.matched);
        assert_eq!(outcome.text, "loading");
        assert_eq!(runtime.finds(), 3);
    }

    #[tokio::test]
    async fn absent_element_reads_as_empty_text() {
        let runtime = Arc::new(TextTree::new(Vec::new()));
        let validator = validator(runtime);

        let outcome = validator
            .validate(
                &Locator::new("ghost"),
                "done",
                &[],
                Duration::from_millis(20),
                2,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        assert!(!outcome.matched);
        assert_eq!(outcome.text, "");
    }

    #[tokio::test]
    async fn wait_until_text_matches_polls_to_equality() {
        let runtime = Arc::new(TextTree::new(vec![
            Some("loading"),
            Some("loading"),
            Some("ready"),
        ]));
        let validator = validator(runtime.clone());

        let matched = validator
            .wait_until_text_matches(&Locator::new("status"), "ready", Duration::from_secs(2))
            .await
            .unwrap();

        assert!(matched);
        assert_eq!(runtime.finds(), 3);
    }

    #[tokio::test]
    async fn wait_until_text_matches_times_out_within_budget_plus_tick() {
        let runtime = Arc::new(TextTree::new(vec![Some("loading")]));
        let validator = validator(runtime);

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let matched = validator
            .wait_until_text_matches(&Locator::new("status"), "ready", timeout)
            .await
            .unwrap();

        assert!(!matched);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn wait_until_text_changes_confirms_then_detects_divergence() {
        let runtime = Arc::new(TextTree::new(vec![Some("v1"), Some("v1"), Some("v2")]));
        let validator = validator(runtime.clone());

        let changed = validator
            .wait_until_text_changes(&Locator::new("revision"), "v1", Duration::from_secs(2))
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(runtime.finds(), 3);
    }

    #[tokio::test]
    async fn changes_wait_is_false_when_the_known_value_never_appears() {
        let runtime = Arc::new(TextTree::new(vec![Some("v2")]));
        let validator = validator(runtime);

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let changed = validator
            .wait_until_text_changes(&Locator::new("revision"), "v1", timeout)
            .await
            .unwrap();

        assert!(!changed);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn wait_until_text_changes_times_out_on_a_stable_value() {
        let runtime = Arc::new(TextTree::new(vec![Some("v1")]));
        let validator = validator(runtime);

        // Confirmation and divergence share one budget, so the whole wait
        // stays within timeout plus one tick.
        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let changed = validator
            .wait_until_text_changes(&Locator::new("revision"), "v1", timeout)
            .await
            .unwrap();

        assert!(!changed);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_millis(100));
    }
}
