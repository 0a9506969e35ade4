//! LLM-driven browser agent.
//!
//! The model sees a categorized summary of the current page in which every
//! element carries a re-resolvable XPath locator, and acts on the page one
//! tool call at a time.

pub mod agent;
pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod hands;
pub mod history;
pub mod locator;
pub mod navigation;
pub mod observe;
pub mod page;
pub mod scripts;
pub mod tools;
pub mod types;
pub mod validator;
pub mod xpath;

pub use agent::{Agent, AgentEvent, AgentReport, AgentState};
pub use brain::{ChatModel, CompletionRequest, ModelConfig, ModelReply, OpenAiClient};
pub use config::AgentConfig;
pub use error::{AgentError, ModelError, PageError, ToolError};
pub use page::{Capability, Page, WaitUntil};
pub use types::{ActionOutcome, ErrorKind, Message};
