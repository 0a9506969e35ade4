//! Chrome over the DevTools protocol, via `headless_chrome`.
//!
//! The backend is synchronous, so every page operation runs on the blocking
//! pool. Operations on one tab run one at a time, and an operation whose
//! caller stopped waiting does not act on the page afterwards.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::PageError;
use crate::page::{Page, WaitUntil};
use crate::scripts;

const LOAD_POLL: Duration = Duration::from_millis(100);
const ELEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Set once the caller stops waiting for a blocking operation.
#[derive(Debug, Clone, Default)]
struct Abandoned(Arc<AtomicBool>);

impl Abandoned {
    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Call before every step that changes the page.
    fn check(&self) -> anyhow::Result<()> {
        if self.is_set() {
            Err(anyhow!("abandoned: the caller stopped waiting"))
        } else {
            Ok(())
        }
    }
}

struct AbandonOnDrop(Abandoned);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.0.store(true, Ordering::SeqCst);
    }
}

/// Run `op` on the blocking pool, holding `turns` for its whole duration.
///
/// Dropping the returned future (a timeout, a cancelled step) marks the
/// operation abandoned. If it is still queued behind another operation it
/// never starts; if it is running, `op` sees the flag at its next `check`.
async fn run_exclusive<T, F>(turns: Arc<Mutex<()>>, op: F) -> Result<T, PageError>
where
    T: Send + 'static,
    F: FnOnce(&Abandoned) -> anyhow::Result<T> + Send + 'static,
{
    let abandoned = Abandoned::default();
    let _guard = AbandonOnDrop(abandoned.clone());
    tokio::task::spawn_blocking(move || {
        let _turn = turns.lock().unwrap_or_else(PoisonError::into_inner);
        abandoned.check()?;
        op(&abandoned)
    })
    .await
    .map_err(|e| PageError::Other(format!("browser task panicked: {e}")))?
    .map_err(PageError::from_backend)
}

/// One Chrome tab.
pub struct ChromePage {
    tab: Arc<Tab>,
    turns: Arc<Mutex<()>>,
    element_timeout: Duration,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        tab.set_default_timeout(ELEMENT_TIMEOUT);
        Self {
            tab,
            turns: Arc::new(Mutex::new(())),
            element_timeout: ELEMENT_TIMEOUT,
        }
    }

    /// How long element lookups wait inside the browser. Keep it within the
    /// action budget so the backend gives up on its own.
    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.tab.set_default_timeout(timeout);
        self.element_timeout = timeout;
        self
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, PageError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab, &Abandoned) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        run_exclusive(self.turns.clone(), move |abandoned| op(&tab, abandoned)).await
    }
}

/// `JSON.stringify((script)(args))`, so any result crosses the protocol as
/// one string.
fn call_expression(script: &str, args: &Value) -> String {
    format!("JSON.stringify(({})({}))", script.trim(), args)
}

fn evaluate_on(tab: &Tab, script: &str, args: &Value) -> anyhow::Result<Value> {
    let result = tab.evaluate(&call_expression(script, args), false)?;
    match result.value {
        Some(Value::String(json)) => serde_json::from_str(&json).context("script returned malformed JSON"),
        _ => Ok(Value::Null),
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<(), PageError> {
        let url = url.to_string();
        let element_timeout = self.element_timeout;
        self.blocking(move |tab, abandoned| {
            tab.set_default_timeout(timeout);
            let loaded = (|| -> anyhow::Result<()> {
                tab.navigate_to(&url)?;
                tab.wait_until_navigated()?;
                if wait_until == WaitUntil::Load {
                    let deadline = std::time::Instant::now() + timeout;
                    while evaluate_on(tab, scripts::READY_STATE, &Value::Null)? != "complete" {
                        if std::time::Instant::now() >= deadline || abandoned.is_set() {
                            return Err(anyhow!("timed out waiting for the load event"));
                        }
                        std::thread::sleep(LOAD_POLL);
                    }
                }
                Ok(())
            })();
            tab.set_default_timeout(element_timeout);
            loaded
        })
        .await
        .map_err(|e| match e {
            PageError::Other(message) => PageError::Navigation(message),
            other => other,
        })
    }

    async fn reload(&self) -> Result<(), PageError> {
        self.blocking(|tab, _| {
            tab.reload(false, None)?;
            Ok(())
        })
        .await
    }

    async fn clear_cookies(&self) -> Result<(), PageError> {
        self.blocking(|tab, _| {
            tab.call_method(Network::ClearBrowserCookies(None))?;
            Ok(())
        })
        .await
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), PageError> {
        let headers = headers.to_vec();
        self.blocking(move |tab, _| {
            let map: HashMap<&str, &str> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            tab.set_extra_http_headers(map)?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, PageError> {
        self.blocking(|tab, _| Ok(tab.get_url())).await
    }

    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, PageError> {
        let script = script.to_string();
        self.blocking(move |tab, _| evaluate_on(tab, &script, &args))
            .await
            .map_err(|e| match e {
                PageError::Other(message) => PageError::Script(message),
                other => other,
            })
    }

    async fn click(&self, xpath: &str) -> Result<(), PageError> {
        let xpath = xpath.to_string();
        self.blocking(move |tab, abandoned| {
            let element = tab.find_element_by_xpath(&xpath)?;
            abandoned.check()?;
            element.click()?;
            Ok(())
        })
        .await
    }

    async fn type_text(&self, xpath: &str, text: &str) -> Result<(), PageError> {
        let (xpath, text) = (xpath.to_string(), text.to_string());
        self.blocking(move |tab, abandoned| {
            let element = tab.find_element_by_xpath(&xpath)?;
            abandoned.check()?;
            evaluate_on(tab, scripts::PREPARE_INPUT, &serde_json::json!({ "selector": xpath }))?;
            abandoned.check()?;
            element.type_into(&text)?;
            Ok(())
        })
        .await
    }

    async fn submit(&self, xpath: &str) -> Result<(), PageError> {
        let xpath = xpath.to_string();
        self.blocking(move |tab, _| {
            let outcome = evaluate_on(tab, scripts::SUBMIT, &serde_json::json!({ "selector": xpath }))?;
            match outcome.as_str() {
                Some("submitted") => Ok(()),
                Some("no-form") => {
                    tab.press_key("Enter")?;
                    Ok(())
                }
                _ => Err(anyhow!("no element matches {xpath}")),
            }
        })
        .await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PageError> {
        let clicked = self
            .evaluate(scripts::CLICK_AT, serde_json::json!({ "x": x, "y": y }))
            .await?;
        if clicked.is_null() {
            return Err(PageError::NotFound(format!("nothing at ({x}, {y})")));
        }
        debug!(x, y, target = %clicked, "clicked at position");
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        self.blocking(|tab, _| tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true))
            .await
    }
}

/// How to get hold of a browser.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub headless: bool,
    /// DevTools endpoint of an already running Chrome, e.g. `http://127.0.0.1:9222`.
    pub attach: Option<String>,
    /// Persistent profile; defaults to a directory under the user's local data dir.
    pub profile_dir: Option<PathBuf>,
}

/// Owns the browser process or connection. Pages handed out borrow it.
pub struct BrowserSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attach when asked to, otherwise launch Chrome with a persistent profile.
    pub fn open(options: &SessionOptions) -> anyhow::Result<Self> {
        match &options.attach {
            Some(endpoint) => Self::attach(endpoint),
            None => Self::launch(options),
        }
    }

    pub fn attach(endpoint: &str) -> anyhow::Result<Self> {
        info!(endpoint, "attaching to running Chrome");
        let browser = Browser::connect(endpoint.to_string())
            .with_context(|| format!("could not attach to Chrome at {endpoint}"))?;
        let existing = {
            let tabs = browser.get_tabs();
            let tabs = tabs.lock().map_err(|_| anyhow!("browser tab list is poisoned"))?;
            tabs.first().cloned()
        };
        let tab = match existing {
            Some(tab) => tab,
            None => browser.new_tab()?,
        };
        Ok(Self { browser, tab })
    }

    pub fn launch(options: &SessionOptions) -> anyhow::Result<Self> {
        let profile = match &options.profile_dir {
            Some(dir) => dir.clone(),
            None => default_profile_dir()?,
        };
        std::fs::create_dir_all(&profile)
            .with_context(|| format!("could not create profile directory {}", profile.display()))?;
        info!(profile = %profile.display(), headless = options.headless, "launching Chrome");

        let launch = LaunchOptions {
            headless: options.headless,
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };
        let browser = Browser::new(launch).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        if let Err(e) = tab.navigate_to("about:blank") {
            warn!(error = %e, "could not open blank page");
        }
        Ok(Self { browser, tab })
    }

    pub fn page(&self) -> ChromePage {
        ChromePage::new(self.tab.clone())
    }

    /// Fresh tab for the next agent.
    pub fn new_page(&mut self) -> anyhow::Result<ChromePage> {
        self.tab = self.browser.new_tab()?;
        Ok(self.page())
    }
}

fn default_profile_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| anyhow!("no local data directory for the browser profile"))?;
    Ok(base.join("browser-agent").join("profile"))
}
