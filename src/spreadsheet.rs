//! Workbook automation: a host port plus the [`Workbook`] wrapper.
//!
//! [`WorkbookHost`] is the seam to a concrete spreadsheet application, shaped
//! like [`crate::driver::DriverRuntime`]: every method has a default body
//! returning [`WorkbookHostError::Unsupported`] so an adapter implements only
//! what its host provides. [`Workbook`] layers the lifecycle rules on top:
//! path validation before open, a close that tolerates an already-gone host,
//! and a quit that retries while the host reports busy before force-killing
//! it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::logging::ActionLogger;

/// Graceful-quit retry budget while the host reports busy.
pub const QUIT_RETRIES: u32 = 5;
/// Delay between graceful-quit retries.
pub const QUIT_DELAY: Duration = Duration::from_secs(2);
/// Settle time after a clipboard copy before the data is pasted.
pub const COPY_SETTLE: Duration = Duration::from_secs(3);

/// Paste variants, carrying the host protocol's paste-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteMode {
    All,
    Values,
    Formats,
    Formulas,
}

impl PasteMode {
    pub fn code(self) -> i32 {
        match self {
            PasteMode::All => -4104,
            PasteMode::Values => -4163,
            PasteMode::Formats => -4122,
            PasteMode::Formulas => -4123,
        }
    }
}

/// Application window state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Normal,
    Maximized,
    Minimized,
}

impl WindowState {
    pub fn code(self) -> i32 {
        match self {
            WindowState::Normal => -4143,
            WindowState::Maximized => -4137,
            WindowState::Minimized => -4140,
        }
    }
}

/// Application-level switches applied at host start.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub window_state: WindowState,
    pub display_alerts: bool,
    pub visible: bool,
    pub screen_updating: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            window_state: WindowState::Maximized,
            display_alerts: false,
            visible: true,
            screen_updating: false,
        }
    }
}

/// One-based cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Faults surfaced by a [`WorkbookHost`].
#[derive(Debug, Error)]
pub enum WorkbookHostError {
    /// The host cannot service the request yet.
    #[error("host busy: {0}")]
    Busy(String),
    /// The host process has gone away underneath us.
    #[error("host disconnected: {0}")]
    Disconnected(String),
    #[error("no sheet named {0}")]
    SheetMissing(String),
    #[error("no workbook is open")]
    NoWorkbook,
    #[error("operation not supported by this host: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Message(String),
}

impl WorkbookHostError {
    pub fn is_busy(&self) -> bool {
        matches!(self, WorkbookHostError::Busy(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, WorkbookHostError::Disconnected(_))
    }
}

/// Errors surfaced by [`Workbook`] operations.
#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("workbook file not found: {path}")]
    FileMissing { path: PathBuf },
    #[error("host termination failed after {attempts} attempts")]
    TerminationFailed {
        attempts: u32,
        #[source]
        source: WorkbookHostError,
    },
    #[error(transparent)]
    Host(#[from] WorkbookHostError),
}

/// Primitives a spreadsheet host provides. `None` cell values are blank
/// cells, both on read and on write.
#[async_trait]
pub trait WorkbookHost: Send + Sync {
    async fn start(&self, _options: &HostOptions) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("start"))
    }

    async fn open(&self, _path: &Path, _read_only: bool) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("open"))
    }

    async fn save(&self) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("save"))
    }

    async fn save_as(&self, _path: &Path) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("save_as"))
    }

    async fn save_copy_as(&self, _path: &Path) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("save_copy_as"))
    }

    async fn close(&self, _save_changes: bool) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("close"))
    }

    /// Gracefully quit the host application.
    async fn quit(&self) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("quit"))
    }

    /// Forcibly kill the host process, scoped to the current user.
    async fn force_kill(&self) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("force_kill"))
    }

    async fn run_macro(&self, _name: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("run_macro"))
    }

    async fn select_sheet(&self, _name: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("select_sheet"))
    }

    async fn add_sheet(&self, _name: Option<&str>) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("add_sheet"))
    }

    async fn rename_sheet(&self, _old: &str, _new: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("rename_sheet"))
    }

    async fn delete_sheet(&self, _name: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("delete_sheet"))
    }

    async fn hide_sheet(&self, _name: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("hide_sheet"))
    }

    async fn show_sheet(&self, _name: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("show_sheet"))
    }

    async fn sheet_names(&self) -> Result<Vec<String>, WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("sheet_names"))
    }

    async fn read_cell(&self, _cell: CellRef) -> Result<Option<String>, WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("read_cell"))
    }

    async fn write_cell(
        &self,
        _cell: CellRef,
        _value: Option<&str>,
    ) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("write_cell"))
    }

    /// Read an A1-style range as a row-major grid.
    async fn read_range(&self, _range: &str) -> Result<Vec<Vec<Option<String>>>, WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("read_range"))
    }

    /// Write a row-major grid anchored at `start`.
    async fn write_block(
        &self,
        _start: CellRef,
        _values: &[Vec<Option<String>>],
    ) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("write_block"))
    }

    async fn clear_range(&self, _range: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("clear_range"))
    }

    async fn copy_range(&self, _range: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("copy_range"))
    }

    async fn paste_range(&self, _target: &str, _mode: PasteMode) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("paste_range"))
    }

    /// Rows and columns of the sheet's used extent.
    async fn used_extent(&self) -> Result<(u32, u32), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("used_extent"))
    }

    /// Column of the first whole-cell match for `value` in `row`.
    async fn find_in_row(&self, _row: u32, _value: &str) -> Result<Option<u32>, WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("find_in_row"))
    }

    async fn protect_sheet(&self, _name: &str, _password: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("protect_sheet"))
    }

    async fn unprotect_sheet(&self, _name: &str, _password: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("unprotect_sheet"))
    }

    async fn protect_workbook(&self, _password: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("protect_workbook"))
    }

    async fn unprotect_workbook(&self, _password: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("unprotect_workbook"))
    }

    async fn named_ranges(&self) -> Result<Vec<String>, WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("named_ranges"))
    }

    async fn read_named(&self, _name: &str) -> Result<Option<String>, WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("read_named"))
    }

    async fn write_named(&self, _name: &str, _value: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("write_named"))
    }

    async fn add_named(&self, _name: &str, _refers_to: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("add_named"))
    }

    async fn delete_named(&self, _name: &str) -> Result<(), WorkbookHostError> {
        Err(WorkbookHostError::Unsupported("delete_named"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Running,
    Terminated,
}

/// Workbook operations over a [`WorkbookHost`], with lifecycle handling.
pub struct Workbook<H> {
    host: H,
    logger: ActionLogger,
    state: Mutex<HostState>,
    quit_retries: u32,
    quit_delay: Duration,
    copy_settle: Duration,
}

impl<H: WorkbookHost> Workbook<H> {
    pub async fn start(
        host: H,
        logger: ActionLogger,
        options: &HostOptions,
    ) -> Result<Self, WorkbookError> {
        host.start(options).await?;
        logger.debug("workbook host started", Some("workbook"), None);
        Ok(Self {
            host,
            logger,
            state: Mutex::new(HostState::Running),
            quit_retries: QUIT_RETRIES,
            quit_delay: QUIT_DELAY,
            copy_settle: COPY_SETTLE,
        })
    }

    /// Override the busy-retry budget and delay used by [`Self::quit`].
    pub fn with_termination_policy(mut self, retries: u32, delay: Duration) -> Self {
        self.quit_retries = retries.max(1);
        self.quit_delay = delay;
        self
    }

    /// Override the settle time applied after [`Self::copy_range`].
    pub fn with_copy_settle(mut self, settle: Duration) -> Self {
        self.copy_settle = settle;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Open a workbook file. Relative paths resolve against the working
    /// directory; the file must already exist.
    pub async fn open(&self, path: impl AsRef<Path>, read_only: bool) -> Result<(), WorkbookError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|err| WorkbookError::Host(WorkbookHostError::Message(err.to_string())))?
                .join(path)
        };
        if !absolute.exists() {
            self.logger.error(
                &format!("file {} does not exist", absolute.display()),
                Some("workbook"),
                None,
            );
            return Err(WorkbookError::FileMissing { path: absolute });
        }
        self.host.open(&absolute, read_only).await?;
        self.logger.debug(
            &format!("workbook {} opened", absolute.display()),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn save(&self) -> Result<(), WorkbookError> {
        self.host.save().await?;
        self.logger.debug("workbook saved", Some("workbook"), None);
        Ok(())
    }

    pub async fn save_as(&self, path: impl AsRef<Path>) -> Result<(), WorkbookError> {
        let path = path.as_ref();
        self.host.save_as(path).await?;
        self.logger.debug(
            &format!("workbook saved as {}", path.display()),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn save_copy_as(&self, path: impl AsRef<Path>) -> Result<(), WorkbookError> {
        let path = path.as_ref();
        self.host.save_copy_as(path).await?;
        self.logger.debug(
            &format!("workbook copy saved as {}", path.display()),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    /// Close the open workbook. A host that already went away is not an
    /// error; other close faults are logged and swallowed.
    pub async fn close(&self, save_changes: bool) -> Result<(), WorkbookError> {
        match self.host.close(save_changes).await {
            Ok(()) => {}
            Err(err) if err.is_disconnected() => {
                self.logger
                    .debug("host already gone at close", Some("workbook"), None);
            }
            Err(err) => {
                self.logger.error(
                    &format!("error closing workbook: {err}"),
                    Some("workbook"),
                    None,
                );
            }
        }
        self.logger.debug("workbook closed", Some("workbook"), None);
        Ok(())
    }

    /// Gracefully quit the host, retrying while it reports busy, then
    /// force-kill. Safe to call any number of times.
    pub async fn quit(&self) -> Result<(), WorkbookError> {
        {
            let state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state == HostState::Terminated {
                return Ok(());
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.host.quit().await {
                Ok(()) => {
                    self.mark_terminated();
                    self.logger
                        .debug("workbook host quit", Some("workbook"), None);
                    return Ok(());
                }
                Err(err) if err.is_busy() && attempt < self.quit_retries => {
                    self.logger.info(
                        &format!("host busy, retrying quit ({attempt}/{})", self.quit_retries),
                        Some("workbook"),
                        Some(json!({ "reason": err.to_string() })),
                    );
                    tokio::time::sleep(self.quit_delay).await;
                }
                Err(err) if err.is_busy() => break,
                Err(err) => {
                    self.logger.error(
                        &format!("unable to quit host gracefully: {err}"),
                        Some("workbook"),
                        None,
                    );
                    break;
                }
            }
        }

        self.logger
            .error("killing the host forcefully", Some("workbook"), None);
        match self.host.force_kill().await {
            Ok(()) => {
                self.mark_terminated();
                self.logger
                    .debug("host killed forcefully", Some("workbook"), None);
                Ok(())
            }
            Err(source) => Err(WorkbookError::TerminationFailed {
                attempts: attempt,
                source,
            }),
        }
    }

    pub async fn run_macro(&self, name: &str) -> Result<(), WorkbookError> {
        self.host.run_macro(name).await?;
        self.logger
            .debug(&format!("macro {name} run"), Some("workbook"), None);
        Ok(())
    }

    pub async fn select_sheet(&self, name: &str) -> Result<(), WorkbookError> {
        self.host.select_sheet(name).await?;
        self.logger
            .debug(&format!("worksheet {name} selected"), Some("workbook"), None);
        Ok(())
    }

    pub async fn add_sheet(&self, name: Option<&str>) -> Result<(), WorkbookError> {
        self.host.add_sheet(name).await?;
        match name {
            Some(name) => self.logger.debug(
                &format!("worksheet {name} added"),
                Some("workbook"),
                None,
            ),
            None => self
                .logger
                .debug("worksheet added", Some("workbook"), None),
        }
        Ok(())
    }

    pub async fn rename_sheet(&self, old: &str, new: &str) -> Result<(), WorkbookError> {
        self.host.rename_sheet(old, new).await?;
        self.logger.debug(
            &format!("worksheet {old} renamed to {new}"),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn delete_sheet(&self, name: &str) -> Result<(), WorkbookError> {
        self.host.delete_sheet(name).await?;
        self.logger
            .debug(&format!("worksheet {name} deleted"), Some("workbook"), None);
        Ok(())
    }

    pub async fn hide_sheet(&self, name: &str) -> Result<(), WorkbookError> {
        self.host.hide_sheet(name).await?;
        self.logger
            .debug(&format!("worksheet {name} hidden"), Some("workbook"), None);
        Ok(())
    }

    pub async fn show_sheet(&self, name: &str) -> Result<(), WorkbookError> {
        self.host.show_sheet(name).await?;
        self.logger
            .debug(&format!("worksheet {name} shown"), Some("workbook"), None);
        Ok(())
    }

    pub async fn sheet_names(&self) -> Result<Vec<String>, WorkbookError> {
        Ok(self.host.sheet_names().await?)
    }

    pub async fn read_cell(&self, cell: CellRef) -> Result<Option<String>, WorkbookError> {
        let value = self.host.read_cell(cell).await?;
        self.logger.debug(
            &format!(
                "cell {cell} read, value is '{}'",
                value.as_deref().unwrap_or("")
            ),
            Some("workbook"),
            None,
        );
        Ok(value)
    }

    pub async fn write_cell(&self, cell: CellRef, value: &str) -> Result<(), WorkbookError> {
        self.host.write_cell(cell, Some(value)).await?;
        self.logger.debug(
            &format!("cell {cell} set to '{value}'"),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn clear_cell(&self, cell: CellRef) -> Result<(), WorkbookError> {
        self.host.write_cell(cell, None).await?;
        self.logger
            .debug(&format!("cell {cell} cleared"), Some("workbook"), None);
        Ok(())
    }

    /// Read a range as a grid, blanks included as `None`.
    pub async fn read_range(&self, range: &str) -> Result<Vec<Vec<Option<String>>>, WorkbookError> {
        let values = self.host.read_range(range).await?;
        self.logger
            .debug(&format!("range {range} read"), Some("workbook"), None);
        Ok(values)
    }

    /// Read a range as text, rendering blank cells as empty strings.
    pub async fn read_range_text(&self, range: &str) -> Result<Vec<Vec<String>>, WorkbookError> {
        let values = self.read_range(range).await?;
        Ok(values
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| cell.unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    /// Write a grid anchored at `start`; `None` entries blank their cells.
    pub async fn write_block(
        &self,
        start: CellRef,
        values: &[Vec<Option<String>>],
    ) -> Result<(), WorkbookError> {
        self.host.write_block(start, values).await?;
        self.logger.debug(
            &format!("block of {} rows written at {start}", values.len()),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn clear_range(&self, range: &str) -> Result<(), WorkbookError> {
        self.host.clear_range(range).await?;
        self.logger
            .debug(&format!("range {range} cleared"), Some("workbook"), None);
        Ok(())
    }

    /// Copy a range to the clipboard, then wait for the copy to settle.
    pub async fn copy_range(&self, range: &str) -> Result<(), WorkbookError> {
        self.host.copy_range(range).await?;
        self.logger
            .debug(&format!("range {range} copied"), Some("workbook"), None);
        tokio::time::sleep(self.copy_settle).await;
        Ok(())
    }

    pub async fn paste_range(&self, target: &str, mode: PasteMode) -> Result<(), WorkbookError> {
        self.host.paste_range(target, mode).await?;
        self.logger.debug(
            &format!("pasted to range {target}"),
            Some("workbook"),
            Some(json!({ "paste_type": mode.code() })),
        );
        Ok(())
    }

    pub async fn used_extent(&self) -> Result<(u32, u32), WorkbookError> {
        Ok(self.host.used_extent().await?)
    }

    /// Read the cell in `row_index` under the column whose `title_row` cell
    /// matches `title` exactly. `None` when the title is absent.
    pub async fn read_by_title(
        &self,
        title: &str,
        row_index: u32,
        title_row: u32,
    ) -> Result<Option<String>, WorkbookError> {
        match self.host.find_in_row(title_row, title).await? {
            Some(col) => {
                let value = self.host.read_cell(CellRef::new(row_index, col)).await?;
                self.logger.debug(
                    &format!(
                        "cell under title '{title}' read, value is '{}'",
                        value.as_deref().unwrap_or("")
                    ),
                    Some("workbook"),
                    None,
                );
                Ok(value)
            }
            None => {
                self.logger.debug(
                    &format!("title '{title}' not found in row {title_row}"),
                    Some("workbook"),
                    None,
                );
                Ok(None)
            }
        }
    }

    pub async fn protect_sheet(&self, name: &str, password: &str) -> Result<(), WorkbookError> {
        self.host.protect_sheet(name, password).await?;
        self.logger
            .debug(&format!("worksheet {name} protected"), Some("workbook"), None);
        Ok(())
    }

    pub async fn unprotect_sheet(&self, name: &str, password: &str) -> Result<(), WorkbookError> {
        self.host.unprotect_sheet(name, password).await?;
        self.logger.debug(
            &format!("worksheet {name} unprotected"),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn protect_workbook(&self, password: &str) -> Result<(), WorkbookError> {
        self.host.protect_workbook(password).await?;
        self.logger
            .debug("workbook protected", Some("workbook"), None);
        Ok(())
    }

    pub async fn unprotect_workbook(&self, password: &str) -> Result<(), WorkbookError> {
        self.host.unprotect_workbook(password).await?;
        self.logger
            .debug("workbook unprotected", Some("workbook"), None);
        Ok(())
    }

    pub async fn named_ranges(&self) -> Result<Vec<String>, WorkbookError> {
        Ok(self.host.named_ranges().await?)
    }

    pub async fn read_named(&self, name: &str) -> Result<Option<String>, WorkbookError> {
        Ok(self.host.read_named(name).await?)
    }

    pub async fn write_named(&self, name: &str, value: &str) -> Result<(), WorkbookError> {
        self.host.write_named(name, value).await?;
        self.logger.debug(
            &format!("named range {name} set to '{value}'"),
            Some("workbook"),
            None,
        );
        Ok(())
    }

    pub async fn add_named(&self, name: &str, refers_to: &str) -> Result<(), WorkbookError> {
        self.host.add_named(name, refers_to).await?;
        self.logger
            .debug(&format!("named range {name} added"), Some("workbook"), None);
        Ok(())
    }

    pub async fn delete_named(&self, name: &str) -> Result<(), WorkbookError> {
        self.host.delete_named(name).await?;
        self.logger
            .debug(&format!("named range {name} deleted"), Some("workbook"), None);
        Ok(())
    }

    fn mark_terminated(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = HostState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogConfig, LogLevel};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::time::Instant;

    fn quiet_logger() -> ActionLogger {
        ActionLogger::new(LogConfig {
            verbose: LogLevel::Error,
            external: Some(Arc::new(|_| {})),
        })
    }

    #[derive(Default)]
    struct ScriptedHost {
        ops: Mutex<Vec<String>>,
        quit_script: Mutex<VecDeque<Result<(), WorkbookHostError>>>,
        quits: Mutex<usize>,
        kills: Mutex<usize>,
        close_error: Mutex<Option<WorkbookHostError>>,
        cells: Mutex<HashMap<(u32, u32), String>>,
        titles: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedHost {
        fn busy_times(n: usize) -> Self {
            Self {
                quit_script: Mutex::new(
                    (0..n)
                        .map(|_| {
                            Err(WorkbookHostError::Busy(
                                "the application is busy".to_string(),
                            ))
                        })
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn record(&self, op: impl Into<String>) {
            self.ops.lock().unwrap().push(op.into());
        }

        fn quits(&self) -> usize {
            *self.quits.lock().unwrap()
        }

        fn kills(&self) -> usize {
            *self.kills.lock().unwrap()
        }
    }

    #[async_trait]
    impl WorkbookHost for ScriptedHost {
        async fn start(&self, _options: &HostOptions) -> Result<(), WorkbookHostError> {
            self.record("start");
            Ok(())
        }

        async fn open(&self, path: &Path, read_only: bool) -> Result<(), WorkbookHostError> {
            self.record(format!("open {} ro={read_only}", path.display()));
            Ok(())
        }

        async fn close(&self, save_changes: bool) -> Result<(), WorkbookHostError> {
            self.record(format!("close save={save_changes}"));
            match self.close_error.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn quit(&self) -> Result<(), WorkbookHostError> {
            *self.quits.lock().unwrap() += 1;
            self.quit_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn force_kill(&self) -> Result<(), WorkbookHostError> {
            *self.kills.lock().unwrap() += 1;
            Ok(())
        }

        async fn read_cell(&self, cell: CellRef) -> Result<Option<String>, WorkbookHostError> {
            Ok(self.cells.lock().unwrap().get(&(cell.row, cell.col)).cloned())
        }

        async fn write_cell(
            &self,
            cell: CellRef,
            value: Option<&str>,
        ) -> Result<(), WorkbookHostError> {
            let mut cells = self.cells.lock().unwrap();
            match value {
                Some(value) => {
                    cells.insert((cell.row, cell.col), value.to_string());
                }
                None => {
                    cells.remove(&(cell.row, cell.col));
                }
            }
            Ok(())
        }

        async fn read_range(
            &self,
            _range: &str,
        ) -> Result<Vec<Vec<Option<String>>>, WorkbookHostError> {
            Ok(vec![
                vec![Some("a".to_string()), None],
                vec![None, Some("d".to_string())],
            ])
        }

        async fn copy_range(&self, range: &str) -> Result<(), WorkbookHostError> {
            self.record(format!("copy {range}"));
            Ok(())
        }

        async fn paste_range(
            &self,
            target: &str,
            mode: PasteMode,
        ) -> Result<(), WorkbookHostError> {
            self.record(format!("paste {target} {}", mode.code()));
            Ok(())
        }

        async fn find_in_row(
            &self,
            _row: u32,
            value: &str,
        ) -> Result<Option<u32>, WorkbookHostError> {
            Ok(self.titles.lock().unwrap().get(value).copied())
        }
    }

    async fn workbook(host: ScriptedHost) -> Workbook<ScriptedHost> {
        Workbook::start(host, quiet_logger(), &HostOptions::default())
            .await
            .unwrap()
            .with_termination_policy(5, Duration::from_millis(10))
            .with_copy_settle(Duration::from_millis(0))
    }

    #[test]
    fn paste_modes_carry_protocol_codes() {
        assert_eq!(PasteMode::All.code(), -4104);
        assert_eq!(PasteMode::Values.code(), -4163);
        assert_eq!(PasteMode::Formats.code(), -4122);
        assert_eq!(PasteMode::Formulas.code(), -4123);
        assert_eq!(WindowState::Maximized.code(), -4137);
    }

    #[tokio::test]
    async fn open_rejects_missing_files_before_touching_the_host() {
        let workbook = workbook(ScriptedHost::default()).await;
        let err = workbook
            .open("/nonexistent/report.xlsx", false)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbookError::FileMissing { .. }));
        assert_eq!(workbook.host().ops.lock().unwrap().as_slice(), ["start"]);
    }

    #[tokio::test]
    async fn open_passes_existing_files_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        std::fs::write(&path, b"stub").unwrap();

        let workbook = workbook(ScriptedHost::default()).await;
        workbook.open(&path, true).await.unwrap();

        let ops = workbook.host().ops.lock().unwrap();
        assert_eq!(ops[1], format!("open {} ro=true", path.display()));
    }

    #[tokio::test]
    async fn close_swallows_a_disconnected_host() {
        let host = ScriptedHost::default();
        *host.close_error.lock().unwrap() = Some(WorkbookHostError::Disconnected(
            "the object invoked has disconnected from its clients".to_string(),
        ));
        let workbook = workbook(host).await;
        workbook.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn close_logs_but_does_not_propagate_other_faults() {
        let host = ScriptedHost::default();
        *host.close_error.lock().unwrap() =
            Some(WorkbookHostError::Message("transient com fault".to_string()));
        let workbook = workbook(host).await;
        workbook.close(true).await.unwrap();
    }

    #[tokio::test]
    async fn busy_quit_retries_the_full_budget_then_kills() {
        let workbook = workbook(ScriptedHost::busy_times(9)).await;

        let start = Instant::now();
        workbook.quit().await.unwrap();

        assert_eq!(workbook.host().quits(), 5);
        assert_eq!(workbook.host().kills(), 1);
        // Four sleeps between the five attempts.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn non_busy_quit_failure_kills_immediately() {
        let host = ScriptedHost {
            quit_script: Mutex::new(
                vec![Err(WorkbookHostError::Message("rpc server gone".to_string()))].into(),
            ),
            ..ScriptedHost::default()
        };
        let workbook = workbook(host).await;
        workbook.quit().await.unwrap();

        assert_eq!(workbook.host().quits(), 1);
        assert_eq!(workbook.host().kills(), 1);
    }

    #[tokio::test]
    async fn quit_is_idempotent() {
        let workbook = workbook(ScriptedHost::default()).await;
        workbook.quit().await.unwrap();
        workbook.quit().await.unwrap();
        assert_eq!(workbook.host().quits(), 1);
    }

    #[tokio::test]
    async fn cells_round_trip_and_clear() {
        let workbook = workbook(ScriptedHost::default()).await;
        let cell = CellRef::new(2, 5);

        workbook.write_cell(cell, "42").await.unwrap();
        assert_eq!(workbook.read_cell(cell).await.unwrap().as_deref(), Some("42"));

        workbook.clear_cell(cell).await.unwrap();
        assert_eq!(workbook.read_cell(cell).await.unwrap(), None);
    }

    #[tokio::test]
    async fn text_reads_render_blanks_as_empty_strings() {
        let workbook = workbook(ScriptedHost::default()).await;
        let grid = workbook.read_range_text("A1:B2").await.unwrap();
        assert_eq!(
            grid,
            vec![
                vec!["a".to_string(), String::new()],
                vec![String::new(), "d".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn title_indexed_reads_resolve_the_column_first() {
        let host = ScriptedHost::default();
        host.titles.lock().unwrap().insert("Status".to_string(), 3);
        host.cells.lock().unwrap().insert((7, 3), "done".to_string());

        let workbook = workbook(host).await;
        assert_eq!(
            workbook.read_by_title("Status", 7, 1).await.unwrap().as_deref(),
            Some("done")
        );
        assert_eq!(workbook.read_by_title("Missing", 7, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn paste_carries_the_mode_code() {
        let workbook = workbook(ScriptedHost::default()).await;
        workbook.copy_range("A1:C3").await.unwrap();
        workbook.paste_range("E1", PasteMode::Values).await.unwrap();

        let ops = workbook.host().ops.lock().unwrap();
        assert!(ops.contains(&"copy A1:C3".to_string()));
        assert!(ops.contains(&"paste E1 -4163".to_string()));
    }

    #[tokio::test]
    async fn unsupported_host_operations_surface_as_such() {
        let workbook = workbook(ScriptedHost::default()).await;
        let err = workbook.run_macro("Refresh").await.unwrap_err();
        assert!(matches!(
            err,
            WorkbookError::Host(WorkbookHostError::Unsupported("run_macro"))
        ));
    }
}
