use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::{PageError, ToolError};
use crate::navigation;
use crate::observe;
use crate::page::{Capability, Page};
use crate::scripts;
use crate::types::ErrorKind;
use crate::validator;
use crate::xpath;

const HIGHLIGHT_COLOR: &str = "red";
const HIGHLIGHT_MS: u64 = 5000;
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// Every action the model may request.
#[derive(Debug, Clone, PartialEq)]
pub enum Tool {
    MoveToUrl { url: String },
    GetUrlContents,
    SendKeysToElement { xpath_selector: String, keys: String },
    CallSubmit { xpath_selector: String },
    ClickElement { xpath_selector: String },
    HighlightElement { xpath_selector: String },
    MoveAndClickAtPagePosition { x: f64, y: f64 },
}

impl Tool {
    pub const NAMES: [&'static str; 7] = [
        "move_to_url",
        "get_url_contents",
        "send_keys_to_element",
        "call_submit",
        "click_element",
        "highlight_element",
        "move_and_click_at_page_position",
    ];

    /// Decode a model tool call. `arguments` is the JSON text the model sent.
    pub fn parse(name: &str, arguments: &str) -> Result<Tool, ToolError> {
        let args: Map<String, Value> = if arguments.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str(arguments) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(ToolError::argument(name, "arguments must be a JSON object")),
                Err(e) => return Err(ToolError::argument(name, format!("arguments are not valid JSON: {e}"))),
            }
        };

        match name {
            "move_to_url" => Ok(Tool::MoveToUrl {
                url: normalize_url(&required_string(name, &args, &["url"])?),
            }),
            "get_url_contents" => Ok(Tool::GetUrlContents),
            "send_keys_to_element" => Ok(Tool::SendKeysToElement {
                xpath_selector: selector(name, &args)?,
                keys: string_arg(&args, &["keys", "text"])
                    .ok_or_else(|| ToolError::argument(name, "missing string argument `keys`"))?,
            }),
            "call_submit" => Ok(Tool::CallSubmit {
                xpath_selector: selector(name, &args)?,
            }),
            "click_element" => Ok(Tool::ClickElement {
                xpath_selector: selector(name, &args)?,
            }),
            "highlight_element" => Ok(Tool::HighlightElement {
                xpath_selector: selector(name, &args)?,
            }),
            "move_and_click_at_page_position" => Ok(Tool::MoveAndClickAtPagePosition {
                x: coordinate(name, &args, &["x", "location_x"])?,
                y: coordinate(name, &args, &["y", "location_y"])?,
            }),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::MoveToUrl { .. } => "move_to_url",
            Tool::GetUrlContents => "get_url_contents",
            Tool::SendKeysToElement { .. } => "send_keys_to_element",
            Tool::CallSubmit { .. } => "call_submit",
            Tool::ClickElement { .. } => "click_element",
            Tool::HighlightElement { .. } => "highlight_element",
            Tool::MoveAndClickAtPagePosition { .. } => "move_and_click_at_page_position",
        }
    }

    pub fn required_capability(&self) -> Capability {
        match self {
            Tool::MoveToUrl { .. } => Capability::Navigate,
            Tool::GetUrlContents | Tool::HighlightElement { .. } => Capability::ReadDom,
            Tool::SendKeysToElement { .. } | Tool::CallSubmit { .. } | Tool::ClickElement { .. } => {
                Capability::Interact
            }
            Tool::MoveAndClickAtPagePosition { .. } => Capability::Pointer,
        }
    }

    /// Tools after which the page is likely to have changed.
    fn may_change_page(&self) -> bool {
        matches!(
            self,
            Tool::CallSubmit { .. } | Tool::ClickElement { .. } | Tool::MoveAndClickAtPagePosition { .. }
        )
    }
}

fn string_arg(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match args.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn required_string(tool: &str, args: &Map<String, Value>, keys: &[&str]) -> Result<String, ToolError> {
    string_arg(args, keys)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::argument(tool, format!("missing string argument `{}`", keys[0])))
}

fn selector(tool: &str, args: &Map<String, Value>) -> Result<String, ToolError> {
    let xpath = required_string(tool, args, &["xpathSelector", "xpath_selector", "xpath"])?;
    xpath::parse_locator(&xpath).map_err(|e| ToolError::argument(tool, format!("`{xpath}` is not a usable path: {e}")))?;
    Ok(xpath)
}

fn coordinate(tool: &str, args: &Map<String, Value>, keys: &[&str]) -> Result<f64, ToolError> {
    let value = keys
        .iter()
        .find_map(|k| args.get(*k))
        .ok_or_else(|| ToolError::argument(tool, format!("missing numeric argument `{}`", keys[0])))?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(n),
        _ => Err(ToolError::argument(
            tool,
            format!("`{}` must be a non-negative number, got {value}", keys[0]),
        )),
    }
}

fn normalize_url(url: &str) -> String {
    let has_scheme = ["http://", "https://", "about:", "file://", "data:"]
        .iter()
        .any(|p| url.to_lowercase().starts_with(p));
    if has_scheme { url.to_string() } else { format!("https://{url}") }
}

/// Function-calling schema advertised to the model.
pub fn tool_schema() -> Value {
    let selector = json!({
        "type": "string",
        "description": "XPath of the target element, usually an xpath_selector from the page summary."
    });
    let function = |name: &str, description: &str, properties: Value, required: &[&str]| {
        json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    };

    json!([
        function(
            "move_to_url",
            "Open a URL in the current tab and return a summary of the loaded page.",
            json!({ "url": { "type": "string", "description": "Absolute URL to open." } }),
            &["url"],
        ),
        function(
            "get_url_contents",
            "Return a summary of the current page: its elements with selectors, main text and the focused element.",
            json!({}),
            &[],
        ),
        function(
            "send_keys_to_element",
            "Clear an input element and type text into it.",
            json!({
                "xpathSelector": selector,
                "keys": { "type": "string", "description": "Text to type." }
            }),
            &["xpathSelector", "keys"],
        ),
        function(
            "call_submit",
            "Submit the form that owns the element, or press Enter on it.",
            json!({ "xpathSelector": selector }),
            &["xpathSelector"],
        ),
        function(
            "click_element",
            "Click an element.",
            json!({ "xpathSelector": selector }),
            &["xpathSelector"],
        ),
        function(
            "highlight_element",
            "Outline an element on the page for a few seconds so a person can see it.",
            json!({ "xpathSelector": selector }),
            &["xpathSelector"],
        ),
        function(
            "move_and_click_at_page_position",
            "Click at a position in the visible page, in CSS pixels from the top-left corner.",
            json!({
                "x": { "type": "number" },
                "y": { "type": "number" }
            }),
            &["x", "y"],
        ),
    ])
}

/// Text fed back to the model as the tool result, plus the error class when
/// the tool did not do what was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub error: Option<ErrorKind>,
}

impl ToolOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    fn failed(kind: ErrorKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: Some(kind),
        }
    }
}

/// Run one tool against the page. Every failure except a lost page becomes
/// a `ToolOutput` the model can react to.
pub async fn dispatch(tool: &Tool, page: &dyn Page, config: &AgentConfig) -> Result<ToolOutput, PageError> {
    if !page.supports(tool.required_capability()) {
        return Ok(ToolOutput::failed(
            ErrorKind::CapabilityMissing,
            format!("Error: this page cannot run `{}`.", tool.name()),
        ));
    }
    info!(tool = tool.name(), "running tool");

    let output = match tool {
        Tool::MoveToUrl { url } => return move_to_url(page, url, config).await,
        Tool::GetUrlContents => match observe::observe(page, config, true).await {
            Ok(observation) => ToolOutput::ok(observation.render()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => ToolOutput::failed(ErrorKind::ActionFailed, format!("Error: could not read the page: {e}")),
        },
        Tool::SendKeysToElement { xpath_selector, keys } => {
            on_element(page, xpath_selector, config, "type into", move |xpath| page.type_text(xpath, keys)).await?
                .map_ok(|| format!("Typed {} characters into {xpath_selector}.", keys.chars().count()))
        }
        Tool::CallSubmit { xpath_selector } => {
            on_element(page, xpath_selector, config, "submit", move |xpath| page.submit(xpath)).await?
                .map_ok(|| format!("Submitted {xpath_selector}."))
        }
        Tool::ClickElement { xpath_selector } => {
            on_element(page, xpath_selector, config, "click", move |xpath| page.click(xpath)).await?
                .map_ok(|| format!("Clicked {xpath_selector}."))
        }
        Tool::HighlightElement { xpath_selector } => {
            on_element(page, xpath_selector, config, "highlight", move |xpath| async move {
                let args = json!({ "selector": xpath, "color": HIGHLIGHT_COLOR, "duration": HIGHLIGHT_MS });
                page.evaluate(scripts::HIGHLIGHT, args).await.map(|_| ())
            })
            .await?
            .map_ok(|| format!("Highlighted {xpath_selector}."))
        }
        Tool::MoveAndClickAtPagePosition { x, y } => {
            match with_timeout(config.action_timeout, page.click_at(*x, *y)).await {
                Ok(()) => ToolOutput::ok(format!("Clicked at ({x}, {y}).")),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => ToolOutput::failed(ErrorKind::ActionFailed, format!("Error: could not click at ({x}, {y}): {e}")),
            }
        }
    };

    if output.error.is_none() && tool.may_change_page() && config.observe_after_action {
        return with_fresh_observation(page, config, output).await;
    }
    Ok(output)
}

async fn move_to_url(page: &dyn Page, url: &str, config: &AgentConfig) -> Result<ToolOutput, PageError> {
    match navigation::navigate(page, url, &config.navigation).await {
        Ok(attempt) => {
            let mut output = ToolOutput::ok(format!("Current page set to {url}."));
            if attempt > 1 {
                output.text = format!("Current page set to {url} (after {attempt} attempts).");
            }
            with_fresh_observation(page, config, output).await
        }
        Err(failure) if failure.last.is_fatal() => Err(failure.last),
        Err(failure) => Ok(ToolOutput::failed(
            ErrorKind::NavigationError,
            format!(
                "Error: could not open {url} after {} attempts: {}",
                failure.attempts, failure.last
            ),
        )),
    }
}

async fn with_fresh_observation(
    page: &dyn Page,
    config: &AgentConfig,
    mut output: ToolOutput,
) -> Result<ToolOutput, PageError> {
    wait_until_settled(page, config.action_timeout).await?;
    match observe::observe(page, config, false).await {
        Ok(observation) => {
            output.text = format!("{}\n\n{}", output.text, observation.render());
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "observation after action failed");
            output.text = format!("{}\n\nThe page could not be read afterwards: {e}", output.text);
        }
    }
    Ok(output)
}

/// Poll `document.readyState` until the page is interactive, up to `limit`.
async fn wait_until_settled(page: &dyn Page, limit: Duration) -> Result<(), PageError> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match page.evaluate(scripts::READY_STATE, Value::Null).await {
            Ok(Value::String(state)) if state == "complete" || state == "interactive" => return Ok(()),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(());
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}

/// Outcome of resolving the target element before acting on it.
enum ElementStep {
    Done,
    Skipped(ToolOutput),
}

impl ElementStep {
    fn map_ok(self, text: impl FnOnce() -> String) -> ToolOutput {
        match self {
            ElementStep::Done => ToolOutput::ok(text()),
            ElementStep::Skipped(output) => output,
        }
    }
}

/// Resolve `xpath` and run `action` only when it matches exactly one element.
async fn on_element<'a, F, Fut>(
    page: &'a dyn Page,
    xpath: &'a str,
    config: &AgentConfig,
    verb: &str,
    action: F,
) -> Result<ElementStep, PageError>
where
    F: FnOnce(&'a str) -> Fut,
    Fut: Future<Output = Result<(), PageError>> + 'a,
{
    let probe = match validator::resolve(page, xpath, config.locator_timeout).await {
        Ok(probe) => probe,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            return Ok(ElementStep::Skipped(ToolOutput::failed(
                ErrorKind::ActionFailed,
                format!("Error: could not look up {xpath}: {e}"),
            )));
        }
    };
    let resolution = &probe.resolution;

    if probe.invalid {
        let reason = resolution.error.as_deref().unwrap_or("rejected by the page");
        return Ok(ElementStep::Skipped(ToolOutput::failed(
            ErrorKind::ToolArgumentError,
            format!("Error: {xpath} cannot be evaluated: {reason}"),
        )));
    }
    if resolution.match_count == 0 {
        return Ok(ElementStep::Skipped(ToolOutput::failed(
            ErrorKind::LocatorNotFound,
            format!(
                "LocatorNotFound: no element matches {xpath}. Nothing was done. \
                 Call get_url_contents to see the current page and pick another selector."
            ),
        )));
    }
    if resolution.is_ambiguous() {
        let mut text = format!(
            "LocatorAmbiguous: {xpath} matches {} elements. Nothing was done. \
             Pick one by index, for example ({xpath})[1], or refine the path.",
            resolution.match_count
        );
        for (i, snippet) in probe.matches.iter().enumerate() {
            text.push_str(&format!("\n[{}] {snippet}", i + 1));
        }
        return Ok(ElementStep::Skipped(ToolOutput::failed(ErrorKind::LocatorAmbiguous, text)));
    }

    match with_timeout(config.action_timeout, action(xpath)).await {
        Ok(()) => Ok(ElementStep::Done),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => Ok(ElementStep::Skipped(ToolOutput::failed(
            ErrorKind::ActionFailed,
            format!("Error: could not {verb} {xpath}: {e}"),
        ))),
    }
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T, PageError>>) -> Result<T, PageError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(PageError::Timeout(format!("action exceeded {}ms", limit.as_millis()))))
}
