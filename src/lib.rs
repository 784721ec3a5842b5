//! Bounded-wait UI automation for browsers and workbooks.
//!
//! Every operation in this crate runs against an explicit time budget:
//! elements are polled for until a deadline rather than assumed present, and
//! a wait that expires reports how long it actually stood. The layers stack
//! from a swappable [`driver::DriverRuntime`] port (with a bundled
//! chromium adapter in [`runtime`]), through element resolution and single
//! actions, up to the [`steps`] orchestrator that retries whole step
//! sequences over multiple passes.
//!
//! ```no_run
//! use webactions::{Locator, LogConfig, SessionConfig, WebActions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_env()?;
//! let actions = WebActions::new_local(config, LogConfig::default())?;
//!
//! actions.launch().await?;
//! actions.navigate("https://example.com/login").await?;
//! actions.set_text(&Locator::new("username"), "jdoe", None).await?;
//! actions.click(&Locator::new("//button[@type='submit']"), None).await?;
//! let outcome = actions
//!     .validate_text(&Locator::new("banner"), "Welcome", &[], None)
//!     .await?;
//! assert!(outcome.matched);
//! actions.terminate().await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod config;
pub mod driver;
pub mod locator;
pub mod logging;
pub mod resolver;
pub mod runtime;
pub mod selection;
pub mod session;
pub mod settings;
pub mod spreadsheet;
pub mod steps;
pub mod validate;
pub mod wait;
pub mod webactions;

pub use crate::actions::{ActionError, ActionExecutor};
pub use crate::config::{
    BrowserEngine, SessionConfig, SessionConfigError, SessionConfigOverrides,
};
pub use crate::driver::{
    ContextTarget, DriverError, DriverRuntime, ElementHandle, SelectionMethod,
};
pub use crate::locator::{Locator, LocatorStrategy};
pub use crate::logging::{ActionLogRecord, ActionLogger, LogCallback, LogConfig, LogLevel};
pub use crate::resolver::{ElementResolver, Escalation, ResolveError};
pub use crate::runtime::ChromiumoxideRuntime;
pub use crate::selection::{
    SelectionAction, SelectionDispatcher, SelectionError, SelectionTarget,
};
pub use crate::session::{build_plan, SessionError, SessionManager, SessionPlan};
pub use crate::settings::{ReadOptions, Settings, SettingsError, SettingsFile};
pub use crate::spreadsheet::{
    CellRef, HostOptions, PasteMode, WindowState, Workbook, WorkbookError, WorkbookHost,
    WorkbookHostError,
};
pub use crate::steps::{
    FailurePolicy, OrchestrationError, SequenceOutcome, Step, StepKind, StepOrchestrator,
};
pub use crate::validate::{TextValidator, ValidateError, ValidationOutcome};
pub use crate::wait::{poll_until, PollState, TimeBudget};
pub use crate::webactions::{WebActions, WebActionsError};
