use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ModelError;
use crate::types::{Message, ToolCall};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const XAI_BASE_URL: &str = "https://api.x.ai/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

pub const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real browser through tool calls, one action at a time.

Work like this:
1. Open the relevant page with move_to_url.
2. Read the page summary you get back. Every element listed there has an xpath_selector.
3. Act on elements with send_keys_to_element, call_submit, click_element or highlight_element, passing an xpath_selector exactly as listed (or a refined one).
4. Call get_url_contents whenever you need a fresh view of the page.

Rules:
- Call at most one tool per reply. You will see the result before choosing the next action.
- If a tool result says a selector matches several elements, pick one with an index such as (//a[contains(., 'Docs')])[2] or refine the path.
- If a selector matches nothing, request the page contents again and choose another element.
- Use move_and_click_at_page_position only when no selector works.
- When the task is done, reply without a tool call. Start the reply with TASK COMPLETE followed by a short summary of the result.
- If the task cannot be done, start the reply with TASK FAILED followed by the reason.
- If you need information from the user, ask for it in plain text without a tool call."#;

/// What the loop asks the model for each turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Value,
    pub tool_choice: String,
    pub parallel_tool_calls: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Value) -> Self {
        Self {
            messages,
            tools,
            tool_choice: "auto".to_string(),
            parallel_tool_calls: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    /// Content with surrounding whitespace removed, if any remains.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.text().is_none() && self.tool_calls.is_empty()
    }
}

/// The chat-completions collaborator.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelReply, ModelError>;
}

/// Endpoint, credential and model id for an OpenAI-compatible API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl ModelConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// OpenAI when `OPENAI_API_KEY` is set, else xAI when `XAI_API_KEY` is
    /// set, else a local Ollama server. `AGENT_MODEL` overrides the model.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = if let Some(key) = non_empty("OPENAI_API_KEY") {
            Self {
                base_url: non_empty("OPENAI_BASE_URL").unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                api_key: Some(key),
                model: "gpt-4o".to_string(),
            }
        } else if let Some(key) = non_empty("XAI_API_KEY") {
            Self {
                base_url: XAI_BASE_URL.to_string(),
                api_key: Some(key),
                model: "grok-2-latest".to_string(),
            }
        } else {
            Self {
                base_url: OLLAMA_BASE_URL.to_string(),
                api_key: None,
                model: "qwen2.5-coder:7b-instruct-q4_0".to_string(),
            }
        };
        if let Some(model) = non_empty("AGENT_MODEL") {
            config.model = model;
        }
        config
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    tools: &'a Value,
    tool_choice: &'a str,
    parallel_tool_calls: bool,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: Option<String>,
    function: ApiFunction,
}

/// Some servers send `arguments` as an object instead of a JSON string.
#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig) -> Self {
        Self::with_url(config.api_key.clone(), config.completions_url(), config.model.clone())
    }

    pub fn with_url(api_key: Option<String>, api_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    async fn send_request(&self, body: &ApiRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let mut request = self.client.post(&self.api_url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(text);
            return Err(ModelError::Api { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelReply, ModelError> {
        let body = ApiRequest {
            model: &self.model,
            messages: &request.messages,
            tools: &request.tools,
            tool_choice: &request.tool_choice,
            parallel_tool_calls: request.parallel_tool_calls,
            temperature: 0.2,
        };
        let response = self.send_request(&body).await?;
        let api: ApiResponse = response.json().await.map_err(|e| ModelError::Decode(e.to_string()))?;
        let Some(choice) = api.choices.into_iter().next() else {
            return Err(ModelError::Decode("response has no choices".to_string()));
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, call)| {
                let arguments = match call.function.arguments {
                    Value::String(s) => s,
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                };
                ToolCall::new(call.id.unwrap_or_else(|| format!("call_{i}")), call.function.name, arguments)
            })
            .collect::<Vec<_>>();
        debug!(
            model = %self.model,
            tool_calls = tool_calls.len(),
            has_content = choice.message.content.is_some(),
            "completion received"
        );
        Ok(ModelReply {
            content: choice.message.content,
            tool_calls,
        })
    }
}
