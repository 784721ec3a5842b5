//! Driver port: the seam between the toolkit and a concrete session runtime.
//!
//! [`DriverRuntime`] is the full set of primitives the components are built
//! on. Every method has a default body returning
//! [`DriverError::Unsupported`], so an adapter implements only the surface
//! its engine actually provides; tests script small runtimes the same way.
//! The crate ships one real adapter, [`crate::runtime::ChromiumoxideRuntime`].

use async_trait::async_trait;
use thiserror::Error;

use crate::locator::Locator;
use crate::session::SessionPlan;

/// Opaque reference to a live node in the element tree.
///
/// A handle is valid only until the tree mutates. Components resolve, use,
/// and discard handles within a single operation; anything longer must
/// re-resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Target of a context switch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTarget {
    /// The top-level document of the active window.
    Default,
    /// An embedded frame, resolved by locator.
    Frame(Locator),
    /// Another window or tab, addressed by its handle.
    Window(String),
}

/// One concrete way of addressing an option inside a selectable element.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    Index(u32),
    Label(String),
    Value(String),
}

impl SelectionMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            SelectionMethod::Index(_) => "index",
            SelectionMethod::Label(_) => "label",
            SelectionMethod::Value(_) => "value",
        }
    }

    /// The attempted value, rendered for log and error messages.
    pub fn describe(&self) -> String {
        match self {
            SelectionMethod::Index(index) => index.to_string(),
            SelectionMethod::Label(label) => label.clone(),
            SelectionMethod::Value(value) => value.clone(),
        }
    }
}

/// Faults surfaced by a [`DriverRuntime`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The handle refers to a node detached by a tree mutation.
    #[error("stale element reference: {0}")]
    StaleReference(String),
    /// Another node would receive the interaction.
    #[error("interaction intercepted: {0}")]
    Intercepted(String),
    /// The node exists but cannot currently be interacted with.
    #[error("element not interactable: {0}")]
    NotInteractable(String),
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    /// The remote end cannot service the request yet.
    #[error("driver busy: {0}")]
    Busy(String),
    #[error("session not started")]
    NotStarted,
    #[error("operation not supported by this runtime: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Message(String),
}

impl DriverError {
    /// Faults expected to self-resolve within the remaining time budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::Intercepted(_) | DriverError::StaleReference(_)
        )
    }
}

/// Primitives a session runtime provides to the toolkit.
#[async_trait]
pub trait DriverRuntime: Send + Sync {
    /// Launch or attach the underlying session described by `plan`.
    async fn start(&self, _plan: &SessionPlan) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("start"))
    }

    /// Gracefully shut the session down.
    async fn quit(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("quit"))
    }

    /// Forcibly kill the session process. Nothing to kill is not an error.
    async fn force_kill(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("force_kill"))
    }

    async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("navigate"))
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Err(DriverError::Unsupported("current_url"))
    }

    async fn title(&self) -> Result<String, DriverError> {
        Err(DriverError::Unsupported("title"))
    }

    async fn maximize(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("maximize"))
    }

    /// Locate at most one node matching `locator` right now, without waiting.
    /// `require_interactable` additionally demands the node accept input;
    /// a present-but-unready node yields `Ok(None)` so callers keep polling.
    async fn find(
        &self,
        _locator: &Locator,
        _require_interactable: bool,
    ) -> Result<Option<ElementHandle>, DriverError> {
        Err(DriverError::Unsupported("find"))
    }

    async fn click(&self, _handle: &ElementHandle) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("click"))
    }

    async fn clear(&self, _handle: &ElementHandle) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("clear"))
    }

    async fn type_text(&self, _handle: &ElementHandle, _text: &str) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("type_text"))
    }

    /// Send the submit signal to the node (typically an Enter key press).
    async fn submit(&self, _handle: &ElementHandle) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("submit"))
    }

    async fn read_text(&self, _handle: &ElementHandle) -> Result<String, DriverError> {
        Err(DriverError::Unsupported("read_text"))
    }

    async fn switch_context(&self, _target: &ContextTarget) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("switch_context"))
    }

    async fn select_option(
        &self,
        _handle: &ElementHandle,
        _method: &SelectionMethod,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("select_option"))
    }

    async fn deselect_option(
        &self,
        _handle: &ElementHandle,
        _method: &SelectionMethod,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("deselect_option"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareRuntime;

    impl DriverRuntime for BareRuntime {}

    #[tokio::test]
    async fn unimplemented_operations_surface_as_unsupported() {
        let runtime = BareRuntime;
        let err = runtime.navigate("https://example.org").await.unwrap_err();
        assert!(matches!(err, DriverError::Unsupported("navigate")));

        let err = runtime
            .find(&Locator::new("missing"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Unsupported("find")));
    }

    #[test]
    fn only_intercepted_and_stale_are_transient() {
        assert!(DriverError::Intercepted("overlay".into()).is_transient());
        assert!(DriverError::StaleReference("detached".into()).is_transient());
        assert!(!DriverError::NotInteractable("disabled".into()).is_transient());
        assert!(!DriverError::Busy("shutting down".into()).is_transient());
        assert!(!DriverError::Message("boom".into()).is_transient());
    }

    #[test]
    fn selection_methods_describe_their_value() {
        assert_eq!(SelectionMethod::Index(3).kind(), "index");
        assert_eq!(SelectionMethod::Index(3).describe(), "3");
        assert_eq!(SelectionMethod::Label("Canada".into()).describe(), "Canada");
        assert_eq!(SelectionMethod::Value("ca".into()).kind(), "value");
    }
}
