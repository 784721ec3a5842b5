//! Chromiumoxide-based session runtime.
//!
//! Implements [`DriverRuntime`](crate::driver::DriverRuntime) for local
//! Chromium launches over CDP. Element work is done by evaluating small
//! scripts against the active page: each script resolves the target fresh
//! from the query carried in its [`ElementHandle`] and reports a status
//! string, so a vanished node surfaces as a stale reference rather than a
//! protocol fault.

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::BrowserEngine;
use crate::driver::{ContextTarget, DriverError, DriverRuntime, ElementHandle, SelectionMethod};
use crate::locator::{Locator, LocatorStrategy};
use crate::logging::ActionLogger;
use crate::session::SessionPlan;

pub struct ChromiumoxideRuntime {
    state: Arc<Mutex<Option<RuntimeState>>>,
    logger: ActionLogger,
}

struct RuntimeState {
    browser: Browser,
    handler_task: JoinHandle<()>,
    /// Page all element work runs against; swapped by context switches.
    active: Page,
    main_target: String,
}

/// Payload every injected script returns, JSON-encoded as a string so the
/// value survives the protocol boundary regardless of return-by-value
/// settings.
#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    status: String,
    #[serde(default)]
    text: Option<String>,
}

impl ChromiumoxideRuntime {
    pub fn new(logger: ActionLogger) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            logger,
        }
    }

    async fn active_page(&self) -> Result<Page, DriverError> {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|state| state.active.clone())
            .ok_or(DriverError::NotStarted)
    }

    async fn run_script(&self, script: String) -> Result<ScriptOutcome, DriverError> {
        let page = self.active_page().await?;
        let encoded: String = page
            .evaluate(script)
            .await
            .map_err(map_cdp_error)?
            .into_value()
            .map_err(|err| DriverError::Message(format!("script returned no value: {err}")))?;
        serde_json::from_str(&encoded)
            .map_err(|err| DriverError::Message(format!("malformed script outcome: {err}")))
    }

    /// Run `body` with `el` bound to the handle's element, mapping a missing
    /// element to a stale reference.
    async fn element_script(
        &self,
        op: &'static str,
        handle: &ElementHandle,
        body: &str,
    ) -> Result<ScriptOutcome, DriverError> {
        let query = parse_handle(handle)?;
        let script = wrap_script(&resolve_prelude(&query)?, body);
        let outcome = self.run_script(script).await?;
        match outcome.status.as_str() {
            "ok" => Ok(outcome),
            status => Err(status_error(op, handle.id(), status)),
        }
    }
}

#[async_trait]
impl DriverRuntime for ChromiumoxideRuntime {
    async fn start(&self, plan: &SessionPlan) -> Result<(), DriverError> {
        if plan.engine != BrowserEngine::Chromium {
            return Err(DriverError::Unsupported(
                "only the chromium engine is supported by this runtime",
            ));
        }
        {
            let guard = self.state.lock().await;
            if guard.is_some() {
                return Ok(());
            }
        }

        if plan.driver_path.is_some() {
            self.logger.debug(
                "driver binary ignored: this runtime speaks cdp directly",
                Some("runtime"),
                None,
            );
        }
        if !plan.options.is_empty() {
            let keys: Vec<&str> = plan.options.keys().map(String::as_str).collect();
            self.logger.debug(
                &format!("engine options not applied over cdp: {}", keys.join(", ")),
                Some("runtime"),
                None,
            );
        }

        let mut builder = BrowserConfig::builder();
        if let Some(path) = &plan.binary_path {
            builder = builder.chrome_executable(path);
        }
        if !plan.headless {
            builder = builder.with_head();
        }
        let config = builder
            .args(plan.args.clone())
            .build()
            .map_err(DriverError::Message)?;

        let (browser, handler) = Browser::launch(config).await.map_err(map_cdp_error)?;
        let handler_task = spawn_handler(handler, self.logger.clone());
        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                handler_task.abort();
                return Err(map_cdp_error(err));
            }
        };
        let main_target = page.target_id().as_ref().to_string();

        let mut guard = self.state.lock().await;
        *guard = Some(RuntimeState {
            browser,
            handler_task,
            active: page,
            main_target,
        });
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(DriverError::NotStarted)?;
        state.browser.close().await.map_err(map_cdp_error)?;
        state
            .browser
            .wait()
            .await
            .map_err(|err| DriverError::Message(err.to_string()))?;
        // Only drop the state once the shutdown handshake succeeded, so a
        // busy close can be retried.
        if let Some(state) = guard.take() {
            state.handler_task.abort();
        }
        Ok(())
    }

    async fn force_kill(&self) -> Result<(), DriverError> {
        let mut guard = self.state.lock().await;
        match guard.take() {
            None => Ok(()),
            Some(mut state) => {
                state.handler_task.abort();
                match state.browser.kill().await {
                    Some(Err(err)) => Err(DriverError::Message(err.to_string())),
                    _ => Ok(()),
                }
            }
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let page = self.active_page().await?;
        page.goto(url).await.map_err(map_cdp_error)?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let page = self.active_page().await?;
        let url = page.url().await.map_err(map_cdp_error)?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String, DriverError> {
        let page = self.active_page().await?;
        let title = page.get_title().await.map_err(map_cdp_error)?;
        Ok(title.unwrap_or_default())
    }

    async fn find(
        &self,
        locator: &Locator,
        require_interactable: bool,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let handle = handle_for(locator);
        let query = parse_handle(&handle)?;
        let body = if require_interactable {
            "const rects = el.getClientRects();
            const style = window.getComputedStyle(el);
            const visible = rects.length > 0
                && style.visibility !== 'hidden'
                && style.display !== 'none';
            if (!visible || el.disabled === true) {
                return JSON.stringify({ status: 'blocked' });
            }
            return JSON.stringify({ status: 'ok' });"
        } else {
            "return JSON.stringify({ status: 'ok' });"
        };
        let script = wrap_script(&resolve_prelude(&query)?, body);
        let outcome = self.run_script(script).await?;
        match outcome.status.as_str() {
            "ok" => Ok(Some(handle)),
            "missing" | "blocked" => Ok(None),
            status => Err(status_error("find", handle.id(), status)),
        }
    }

    async fn click(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        let body = "el.scrollIntoView({ block: 'center', inline: 'center' });
            const rect = el.getBoundingClientRect();
            const hit = document.elementFromPoint(
                rect.left + rect.width / 2,
                rect.top + rect.height / 2
            );
            if (hit && hit !== el && !el.contains(hit) && !hit.contains(el)) {
                return JSON.stringify({ status: 'intercepted' });
            }
            el.click();
            return JSON.stringify({ status: 'ok' });";
        self.element_script("click", handle, body).await?;
        Ok(())
    }

    async fn clear(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        let body = "el.focus();
            if ('value' in el) {
                el.value = '';
            } else {
                el.textContent = '';
            }
            el.dispatchEvent(new Event('input', { bubbles: true }));
            el.dispatchEvent(new Event('change', { bubbles: true }));
            return JSON.stringify({ status: 'ok' });";
        self.element_script("clear", handle, body).await?;
        Ok(())
    }

    async fn type_text(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let text_json = encode_js(text)?;
        let body = format!(
            "const value = {text_json};
            el.focus();
            if ('value' in el) {{
                el.value = String(el.value || '') + value;
            }} else {{
                el.textContent = String(el.textContent || '') + value;
            }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return JSON.stringify({{ status: 'ok' }});"
        );
        self.element_script("type_text", handle, &body).await?;
        Ok(())
    }

    async fn submit(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        let body = "const form = el.form || el.closest('form');
            if (form) {
                if (form.requestSubmit) {
                    form.requestSubmit();
                } else {
                    form.submit();
                }
                return JSON.stringify({ status: 'ok' });
            }
            el.focus();
            const init = { key: 'Enter', bubbles: true, cancelable: true };
            el.dispatchEvent(new KeyboardEvent('keydown', init));
            el.dispatchEvent(new KeyboardEvent('keyup', init));
            return JSON.stringify({ status: 'ok' });";
        self.element_script("submit", handle, body).await?;
        Ok(())
    }

    async fn read_text(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        let body = "const text = el.innerText != null
                ? String(el.innerText)
                : String(el.textContent || '');
            return JSON.stringify({ status: 'ok', text: text });";
        let outcome = self.element_script("read_text", handle, body).await?;
        Ok(outcome.text.unwrap_or_default())
    }

    async fn switch_context(&self, target: &ContextTarget) -> Result<(), DriverError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(DriverError::NotStarted)?;
        match target {
            ContextTarget::Default => {
                let pages = state.browser.pages().await.map_err(map_cdp_error)?;
                let main = pages
                    .iter()
                    .find(|page| page.target_id().as_ref() == state.main_target)
                    .or_else(|| pages.first())
                    .cloned()
                    .ok_or_else(|| DriverError::Message("no open pages".to_string()))?;
                state.active = main;
                Ok(())
            }
            ContextTarget::Window(handle) => {
                let pages = state.browser.pages().await.map_err(map_cdp_error)?;
                let page = pages
                    .into_iter()
                    .find(|page| page.target_id().as_ref() == handle.as_str())
                    .ok_or_else(|| {
                        DriverError::Message(format!("no window with handle {handle}"))
                    })?;
                state.active = page;
                Ok(())
            }
            ContextTarget::Frame(_) => Err(DriverError::Unsupported(
                "frame targets are not supported by this runtime",
            )),
        }
    }

    async fn select_option(
        &self,
        handle: &ElementHandle,
        method: &SelectionMethod,
    ) -> Result<(), DriverError> {
        let body = selection_body(method, true)?;
        self.element_script("select_option", handle, &body).await?;
        Ok(())
    }

    async fn deselect_option(
        &self,
        handle: &ElementHandle,
        method: &SelectionMethod,
    ) -> Result<(), DriverError> {
        let body = selection_body(method, false)?;
        self.element_script("deselect_option", handle, &body).await?;
        Ok(())
    }
}

#[derive(Debug)]
enum ElementQuery<'a> {
    XPath(&'a str),
    Id(&'a str),
}

/// Handles carry the query they were resolved from, so every operation
/// re-resolves against the live tree.
fn handle_for(locator: &Locator) -> ElementHandle {
    match locator.strategy() {
        LocatorStrategy::PathExpression => ElementHandle::new(format!("xpath={}", locator.raw())),
        LocatorStrategy::Identifier => ElementHandle::new(format!("id={}", locator.raw())),
    }
}

fn parse_handle(handle: &ElementHandle) -> Result<ElementQuery<'_>, DriverError> {
    if let Some(xpath) = handle.id().strip_prefix("xpath=") {
        Ok(ElementQuery::XPath(xpath))
    } else if let Some(id) = handle.id().strip_prefix("id=") {
        Ok(ElementQuery::Id(id))
    } else {
        Err(DriverError::InvalidLocator(handle.id().to_string()))
    }
}

fn resolve_prelude(query: &ElementQuery<'_>) -> Result<String, DriverError> {
    match query {
        ElementQuery::XPath(xpath) => {
            let xpath_json = encode_js(xpath)?;
            Ok(format!(
                "const result = document.evaluate({xpath_json}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
                const el = result.singleNodeValue;"
            ))
        }
        ElementQuery::Id(id) => {
            let id_json = encode_js(id)?;
            Ok(format!("const el = document.getElementById({id_json});"))
        }
    }
}

fn wrap_script(prelude: &str, body: &str) -> String {
    format!(
        "(function() {{
            {prelude}
            if (!el) {{
                return JSON.stringify({{ status: 'missing' }});
            }}
            {body}
        }})()"
    )
}

fn selection_body(method: &SelectionMethod, select: bool) -> Result<String, DriverError> {
    let matcher = match method {
        SelectionMethod::Index(index) => format!(
            "const match = options.length > {index} ? options[{index}] : null;"
        ),
        SelectionMethod::Label(label) => {
            let label_json = encode_js(label)?;
            format!("const match = options.find(opt => opt.text === {label_json}) || null;")
        }
        SelectionMethod::Value(value) => {
            let value_json = encode_js(value)?;
            format!("const match = options.find(opt => opt.value === {value_json}) || null;")
        }
    };
    let guard = if select {
        ""
    } else {
        "if (!el.multiple) {
            return JSON.stringify({ status: 'not-multiple' });
        }"
    };
    let selected = select;
    Ok(format!(
        "if (!el.tagName || el.tagName.toLowerCase() !== 'select') {{
            return JSON.stringify({{ status: 'wrong-element' }});
        }}
        {guard}
        const options = Array.from(el.options);
        {matcher}
        if (!match) {{
            return JSON.stringify({{ status: 'no-option' }});
        }}
        match.selected = {selected};
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
        return JSON.stringify({{ status: 'ok' }});"
    ))
}

fn encode_js(value: &str) -> Result<String, DriverError> {
    serde_json::to_string(value).map_err(|err| DriverError::Message(err.to_string()))
}

fn status_error(op: &'static str, target: &str, status: &str) -> DriverError {
    match status {
        "missing" => DriverError::StaleReference(format!("{target} vanished before {op}")),
        "intercepted" => {
            DriverError::Intercepted(format!("{target} is covered by another element"))
        }
        "wrong-element" => {
            DriverError::NotInteractable(format!("{target} is not a select element"))
        }
        "not-multiple" => DriverError::NotInteractable(format!(
            "{target} is not a multi-select, nothing to deselect"
        )),
        "no-option" => DriverError::Message(format!("no option matched during {op} on {target}")),
        other => DriverError::Message(format!("{op} on {target} returned '{other}'")),
    }
}

fn map_cdp_error<E: std::fmt::Display>(err: E) -> DriverError {
    let text = err.to_string();
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("detached") || lowered.contains("stale") {
        DriverError::StaleReference(text)
    } else if lowered.contains("busy") {
        DriverError::Busy(text)
    } else {
        DriverError::Message(text)
    }
}

fn spawn_handler(mut handler: Handler, logger: ActionLogger) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                logger.debug(&format!("cdp handler error: {err}"), Some("runtime"), None);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogConfig, LogLevel};
    use crate::session::build_plan;
    use crate::config::SessionConfig;

    fn quiet_logger() -> ActionLogger {
        ActionLogger::new(LogConfig {
            verbose: LogLevel::Error,
            external: Some(Arc::new(|_| {})),
        })
    }

    #[test]
    fn handles_carry_their_query() {
        let xpath = handle_for(&Locator::new("//div[@id='x']"));
        assert_eq!(xpath.id(), "xpath=//div[@id='x']");
        assert!(matches!(
            parse_handle(&xpath).unwrap(),
            ElementQuery::XPath("//div[@id='x']")
        ));

        let id = handle_for(&Locator::new("submit-button"));
        assert_eq!(id.id(), "id=submit-button");
        assert!(matches!(
            parse_handle(&id).unwrap(),
            ElementQuery::Id("submit-button")
        ));

        let err = parse_handle(&ElementHandle::new("css=.foo")).unwrap_err();
        assert!(matches!(err, DriverError::InvalidLocator(_)));
    }

    #[test]
    fn preludes_escape_their_queries() {
        let prelude = resolve_prelude(&ElementQuery::XPath(r#"//a[text()="x"]"#)).unwrap();
        assert!(prelude.contains("document.evaluate"));
        assert!(prelude.contains(r#"\"x\""#));

        let prelude = resolve_prelude(&ElementQuery::Id("menu")).unwrap();
        assert!(prelude.contains(r#"document.getElementById("menu")"#));
    }

    #[test]
    fn selection_bodies_match_by_each_method() {
        let body = selection_body(&SelectionMethod::Index(3), true).unwrap();
        assert!(body.contains("options.length > 3"));
        assert!(body.contains("match.selected = true"));

        let body = selection_body(&SelectionMethod::Label("Canada".into()), true).unwrap();
        assert!(body.contains(r#"opt.text === "Canada""#));

        let body = selection_body(&SelectionMethod::Value("ca".into()), false).unwrap();
        assert!(body.contains(r#"opt.value === "ca""#));
        assert!(body.contains("not-multiple"));
        assert!(body.contains("match.selected = false"));
    }

    #[test]
    fn statuses_map_to_driver_faults() {
        assert!(matches!(
            status_error("click", "id=save", "missing"),
            DriverError::StaleReference(_)
        ));
        assert!(matches!(
            status_error("click", "id=save", "intercepted"),
            DriverError::Intercepted(_)
        ));
        assert!(matches!(
            status_error("select_option", "id=menu", "wrong-element"),
            DriverError::NotInteractable(_)
        ));
        assert!(matches!(
            status_error("select_option", "id=menu", "no-option"),
            DriverError::Message(_)
        ));
    }

    #[test]
    fn cdp_errors_classify_by_message() {
        assert!(matches!(
            map_cdp_error("Node is detached from document"),
            DriverError::StaleReference(_)
        ));
        assert!(matches!(
            map_cdp_error("target busy"),
            DriverError::Busy(_)
        ));
        assert!(matches!(
            map_cdp_error("connection reset"),
            DriverError::Message(_)
        ));
    }

    #[tokio::test]
    async fn operations_before_start_report_not_started() {
        let runtime = ChromiumoxideRuntime::new(quiet_logger());
        assert!(matches!(
            runtime.navigate("https://example.org").await.unwrap_err(),
            DriverError::NotStarted
        ));
        assert!(matches!(
            runtime.find(&Locator::new("field"), false).await.unwrap_err(),
            DriverError::NotStarted
        ));
        assert!(matches!(
            runtime.quit().await.unwrap_err(),
            DriverError::NotStarted
        ));
        // Nothing to kill is not an error.
        runtime.force_kill().await.unwrap();
    }

    #[tokio::test]
    async fn non_chromium_engines_are_rejected() {
        let config = SessionConfig {
            engine: BrowserEngine::Firefox,
            ..SessionConfig::default()
        };
        let plan = build_plan(&config).unwrap();
        let runtime = ChromiumoxideRuntime::new(quiet_logger());
        assert!(matches!(
            runtime.start(&plan).await.unwrap_err(),
            DriverError::Unsupported(_)
        ));
    }
}
