//! Session lifecycle: plan assembly, launch, and bounded-retry termination.
//!
//! [`build_plan`] turns a [`SessionConfig`] into the concrete
//! [`SessionPlan`] a runtime launches from: validated executable paths, a
//! created-and-canonicalized download directory, deduplicated command-line
//! args, and layered engine options. [`SessionManager`] owns the runtime's
//! lifecycle; termination retries a graceful quit while the remote end
//! reports busy, then falls back to a forced kill.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::{BrowserEngine, SessionConfig};
use crate::driver::{DriverError, DriverRuntime};
use crate::logging::ActionLogger;

/// Graceful-quit retry budget while the session reports busy.
pub const QUIT_RETRIES: u32 = 3;
/// Delay between graceful-quit retries.
pub const QUIT_DELAY: Duration = Duration::from_secs(2);

/// Errors surfaced by session construction and teardown.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{role} not found: {path}")]
    MissingExecutable { role: &'static str, path: PathBuf },
    #[error("could not prepare download directory {path}")]
    DownloadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch {engine} session")]
    Launch {
        engine: &'static str,
        #[source]
        source: DriverError,
    },
    #[error("session termination failed after {attempts} attempts")]
    TerminationFailed {
        attempts: u32,
        #[source]
        source: DriverError,
    },
    #[error("session state lock poisoned")]
    Poisoned,
}

/// Everything a runtime needs to launch a session.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub engine: BrowserEngine,
    pub binary_path: Option<PathBuf>,
    pub driver_path: Option<PathBuf>,
    /// Absolute; created by [`build_plan`] if it did not exist.
    pub download_dir: Option<PathBuf>,
    /// Deduplicated command-line flags, proxy and certificate flags folded in.
    pub args: Vec<String>,
    /// Engine options: default download prefs, caller overrides, and the
    /// forced log-noise exclusion.
    pub options: Map<String, Value>,
    pub headless: bool,
}

/// Validate paths, prepare the download directory, and assemble args and
/// options from `config`.
pub fn build_plan(config: &SessionConfig) -> Result<SessionPlan, SessionError> {
    let binary_path = config
        .binary_path
        .as_deref()
        .map(|path| validate_executable(path, "browser binary"))
        .transpose()?;
    let driver_path = config
        .driver_path
        .as_deref()
        .map(|path| validate_executable(path, "driver binary"))
        .transpose()?;
    let download_dir = config
        .download_dir
        .as_deref()
        .map(prepare_download_dir)
        .transpose()?;

    Ok(SessionPlan {
        engine: config.engine,
        binary_path,
        driver_path,
        args: assemble_args(config),
        options: assemble_options(config, download_dir.as_deref()),
        download_dir,
        headless: config.headless,
    })
}

fn validate_executable(path: &Path, role: &'static str) -> Result<PathBuf, SessionError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(SessionError::MissingExecutable {
            role,
            path: path.to_path_buf(),
        })
    }
}

/// Create the download directory if needed and return its absolute form.
fn prepare_download_dir(dir: &Path) -> Result<PathBuf, SessionError> {
    std::fs::create_dir_all(dir).map_err(|source| SessionError::DownloadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    dir.canonicalize().map_err(|source| SessionError::DownloadDir {
        path: dir.to_path_buf(),
        source,
    })
}

fn assemble_args(config: &SessionConfig) -> Vec<String> {
    let mut args = config.extra_args.clone();
    if let Some(proxy) = &config.proxy_server {
        args.push(format!("--proxy-server={proxy}"));
    }
    args.push("--ignore-certificate-errors".to_string());

    let mut seen = HashSet::new();
    args.into_iter()
        .filter(|arg| seen.insert(arg.clone()))
        .collect()
}

fn assemble_options(config: &SessionConfig, download_dir: Option<&Path>) -> Map<String, Value> {
    let mut options = Map::new();
    if let Some(dir) = download_dir {
        options.insert(
            "prefs".to_string(),
            json!({
                "download.default_directory": dir.to_string_lossy(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
            }),
        );
    }
    for (key, value) in &config.experimental_options {
        options.insert(key.clone(), value.clone());
    }
    // Always excluded, even over a caller-supplied set.
    options.insert("excludeSwitches".to_string(), json!(["enable-logging"]));
    options
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    NotStarted,
    Active,
    Terminated,
}

/// Owns one runtime's lifecycle from launch to termination.
pub struct SessionManager<R> {
    runtime: Arc<R>,
    logger: ActionLogger,
    plan: SessionPlan,
    state: Mutex<SessionState>,
    quit_retries: u32,
    quit_delay: Duration,
}

impl<R: DriverRuntime> SessionManager<R> {
    pub fn new(
        runtime: Arc<R>,
        logger: ActionLogger,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let plan = build_plan(config)?;
        Ok(Self {
            runtime,
            logger,
            plan,
            state: Mutex::new(SessionState::NotStarted),
            quit_retries: QUIT_RETRIES,
            quit_delay: QUIT_DELAY,
        })
    }

    /// Override the busy-retry budget and delay used by [`Self::terminate`].
    pub fn with_termination_policy(mut self, retries: u32, delay: Duration) -> Self {
        self.quit_retries = retries.max(1);
        self.quit_delay = delay;
        self
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    /// Start the session from the assembled plan. Window maximization is
    /// cosmetic and never fails the launch.
    pub async fn launch(&self) -> Result<(), SessionError> {
        if self.current_state()? == SessionState::Active {
            self.logger
                .debug("session already active", Some("session"), None);
            return Ok(());
        }

        self.runtime.start(&self.plan).await.map_err(|source| {
            self.logger.error(
                &format!("failed to launch {} session", self.plan.engine.as_str()),
                Some("session"),
                Some(json!({ "error": source.to_string() })),
            );
            SessionError::Launch {
                engine: self.plan.engine.as_str(),
                source,
            }
        })?;
        self.set_state(SessionState::Active)?;
        self.logger.info(
            &format!("{} session started", self.plan.engine.as_str()),
            Some("session"),
            Some(json!({ "headless": self.plan.headless, "args": self.plan.args })),
        );

        if let Err(err) = self.runtime.maximize().await {
            self.logger.debug(
                &format!("maximize not applied: {err}"),
                Some("session"),
                None,
            );
        }
        Ok(())
    }

    /// Gracefully quit the session, retrying while the remote end reports
    /// busy, then force-kill. Safe to call any number of times.
    pub async fn terminate(&self) -> Result<(), SessionError> {
        if self.current_state()? != SessionState::Active {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.runtime.quit().await {
                Ok(()) => {
                    self.set_state(SessionState::Terminated)?;
                    self.logger
                        .info("session terminated", Some("session"), None);
                    return Ok(());
                }
                Err(DriverError::Busy(reason)) if attempt < self.quit_retries => {
                    self.logger.info(
                        &format!(
                            "session busy, retrying quit ({attempt}/{})",
                            self.quit_retries
                        ),
                        Some("session"),
                        Some(json!({ "reason": reason })),
                    );
                    tokio::time::sleep(self.quit_delay).await;
                }
                Err(DriverError::Busy(_)) => break,
                Err(err) => {
                    self.logger.error(
                        &format!("graceful quit failed: {err}"),
                        Some("session"),
                        None,
                    );
                    break;
                }
            }
        }
        self.force_kill(attempt).await
    }

    async fn force_kill(&self, attempts: u32) -> Result<(), SessionError> {
        self.logger
            .error("forcing session shutdown", Some("session"), None);
        match self.runtime.force_kill().await {
            Ok(()) => {
                self.set_state(SessionState::Terminated)?;
                self.logger.info("session killed", Some("session"), None);
                Ok(())
            }
            Err(source) => Err(SessionError::TerminationFailed { attempts, source }),
        }
    }

    fn current_state(&self) -> Result<SessionState, SessionError> {
        self.state
            .lock()
            .map(|state| *state)
            .map_err(|_| SessionError::Poisoned)
    }

    fn set_state(&self, next: SessionState) -> Result<(), SessionError> {
        self.state
            .lock()
            .map(|mut state| *state = next)
            .map_err(|_| SessionError::Poisoned)
    }
}

impl<R> Drop for SessionManager<R> {
    fn drop(&mut self) {
        // The runtime adapter reaps its own child process when dropped; an
        // active state here only means the graceful quit was skipped.
        if let Ok(state) = self.state.lock() {
            if *state == SessionState::Active {
                self.logger.info(
                    "session manager dropped while active; runtime drop will reap the process",
                    Some("session"),
                    None,
                );
            }
        }
    }
}
