use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PageError;

/// Load state a navigation waits for before it is considered done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    DomContentLoaded,
    Load,
}

/// Groups of page operations a tool may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Navigate,
    ReadDom,
    Interact,
    Pointer,
}

/// A single open tab the agent drives. The agent borrows it; opening and
/// closing the tab or its browser belongs to whoever created it.
///
/// Element operations take a path expression (XPath 1.0) as produced by the
/// locator synthesizer or supplied by the model.
#[async_trait]
pub trait Page: Send + Sync {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<(), PageError>;

    async fn reload(&self) -> Result<(), PageError>;

    async fn clear_cookies(&self) -> Result<(), PageError>;

    /// Headers sent with every following request. An empty slice resets them.
    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), PageError>;

    async fn current_url(&self) -> Result<String, PageError>;

    /// Run `script`, a JavaScript function expression, with `args` as its
    /// single argument and return its JSON-serializable result.
    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, PageError>;

    async fn click(&self, xpath: &str) -> Result<(), PageError>;

    /// Focus the element, clear it, then type `text` as key presses.
    async fn type_text(&self, xpath: &str, text: &str) -> Result<(), PageError>;

    /// Submit the element's form, or press Enter on it when it has none.
    async fn submit(&self, xpath: &str) -> Result<(), PageError>;

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PageError>;

    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;
}
