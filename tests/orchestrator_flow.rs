//! End-to-end step-sequence runs over the public facade, backed by a
//! scripted in-memory runtime. These cover the multi-pass retry loop, stop
//! states, and failure policies without a real browser.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use webactions::session::SessionPlan;
use webactions::steps::{FailurePolicy, OrchestrationError, Step};
use webactions::{
    ActionLogger, DriverError, DriverRuntime, ElementHandle, Locator, LogConfig, LogLevel,
    SelectionMethod, SelectionTarget, SessionConfig, WebActions,
};

/// A page with named fields, a submit button, and a status element whose
/// text replays `status_script` one entry per read, final entry sticky.
#[derive(Default)]
struct FormRuntime {
    fields: Mutex<HashMap<String, String>>,
    status_script: Mutex<VecDeque<String>>,
    clicks: Mutex<usize>,
    selections: Mutex<Vec<String>>,
}

impl FormRuntime {
    fn with_status(entries: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            status_script: Mutex::new(entries.iter().map(|e| e.to_string()).collect()),
            ..Self::default()
        })
    }

    fn next_status(&self) -> String {
        let mut script = self.status_script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl DriverRuntime for FormRuntime {
    async fn start(&self, _plan: &SessionPlan) -> Result<(), DriverError> {
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn find(
        &self,
        locator: &Locator,
        _interactable: bool,
    ) -> Result<Option<ElementHandle>, DriverError> {
        if locator.raw().starts_with("ghost") {
            return Ok(None);
        }
        Ok(Some(ElementHandle::new(locator.raw())))
    }

    async fn click(&self, _handle: &ElementHandle) -> Result<(), DriverError> {
        *self.clicks.lock().unwrap() += 1;
        Ok(())
    }

    async fn clear(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        self.fields.lock().unwrap().remove(handle.id());
        Ok(())
    }

    async fn type_text(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError> {
        self.fields
            .lock()
            .unwrap()
            .entry(handle.id().to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn submit(&self, _handle: &ElementHandle) -> Result<(), DriverError> {
        Ok(())
    }

    async fn read_text(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        if handle.id() == "status" {
            return Ok(self.next_status());
        }
        Ok(self
            .fields
            .lock()
            .unwrap()
            .get(handle.id())
            .cloned()
            .unwrap_or_default())
    }

    async fn select_option(
        &self,
        handle: &ElementHandle,
        method: &SelectionMethod,
    ) -> Result<(), DriverError> {
        self.selections
            .lock()
            .unwrap()
            .push(format!("{} {} {}", handle.id(), method.kind(), method.describe()));
        Ok(())
    }
}

fn facade(runtime: Arc<FormRuntime>) -> WebActions<FormRuntime> {
    let config = SessionConfig {
        default_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let logger = ActionLogger::new(LogConfig {
        verbose: LogLevel::Error,
        external: Some(Arc::new(|_| {})),
    });
    WebActions::with_runtime(config, runtime, logger)
        .unwrap()
        .with_step_delay(Duration::ZERO)
}

fn login_steps() -> Vec<Step> {
    vec![
        Step::set_text("username", "jdoe"),
        Step::set_text("password", "hunter2"),
        Step::select("country", SelectionTarget::by_label("Iceland")),
        Step::click("//button[@type='submit']"),
        Step::validate_text("status", "Welcome", ["Account locked"]),
    ]
}

#[tokio::test]
async fn a_clean_run_succeeds_on_the_first_pass() {
    let runtime = FormRuntime::with_status(&["Welcome"]);
    let actions = facade(runtime.clone());

    let outcome = actions.run_steps(&login_steps()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.captured.as_deref(), Some("Welcome"));
    assert_eq!(*runtime.clicks.lock().unwrap(), 1);
    assert_eq!(
        runtime.fields.lock().unwrap().get("username").map(String::as_str),
        Some("jdoe")
    );
    assert_eq!(
        runtime.selections.lock().unwrap().as_slice(),
        ["country label Iceland"]
    );
}

#[tokio::test]
async fn a_slow_page_succeeds_on_a_later_pass() {
    let runtime = FormRuntime::with_status(&["Signing in...", "Welcome"]);
    let actions = facade(runtime.clone());

    let outcome = actions.run_steps(&login_steps()).await.unwrap();

    assert!(outcome.success);
    // One full pass ran before the status settled, so the form was driven
    // twice.
    assert_eq!(*runtime.clicks.lock().unwrap(), 2);
}

#[tokio::test]
async fn a_stop_text_halts_without_raising() {
    let runtime = FormRuntime::with_status(&["Account locked"]);
    let actions = facade(runtime.clone());

    let outcome = actions.run_steps(&login_steps()).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.captured.as_deref(), Some("Account locked"));
    // The stop state ended the run on the first pass.
    assert_eq!(*runtime.clicks.lock().unwrap(), 1);
}

#[tokio::test]
async fn exhausted_passes_raise_under_the_default_policy() {
    let runtime = FormRuntime::with_status(&["Signing in..."]);
    let actions = facade(runtime.clone());

    let err = actions
        .run_steps_with(&login_steps(), 2, FailurePolicy::Raise)
        .await
        .unwrap_err();

    match err {
        OrchestrationError::Failed {
            passes, observed, ..
        } => {
            assert_eq!(passes, 2);
            assert_eq!(observed.as_deref(), Some("Signing in..."));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*runtime.clicks.lock().unwrap(), 2);
}

#[tokio::test]
async fn exhausted_passes_can_report_an_outcome_instead() {
    let runtime = FormRuntime::with_status(&["Signing in..."]);
    let actions = facade(runtime.clone());

    let outcome = actions
        .run_steps_with(&login_steps(), 2, FailurePolicy::ReturnOutcome)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.captured.as_deref(), Some("Signing in..."));
}

#[tokio::test]
async fn waits_inside_a_sequence_share_the_run_budget() {
    let runtime = FormRuntime::with_status(&["Welcome"]);
    let actions = facade(runtime.clone());

    // The missing element consumes its whole (overridden) wait on every
    // pass, but the run still terminates and reports the failure.
    let steps = vec![
        Step::wait_exists("ghost-spinner").with_timeout(Duration::from_millis(10)),
        Step::validate_text("status", "Ready", Vec::<String>::new()),
    ];
    let outcome = actions
        .run_steps_with(&steps, 2, FailurePolicy::ReturnOutcome)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.captured.as_deref(), Some("Welcome"));
}
