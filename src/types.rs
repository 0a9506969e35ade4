use serde::{Deserialize, Serialize};

/// Tool results that embed a full page snapshot start with this marker.
pub const SNAPSHOT_MARKER: &str = "PAGE JSON:";
/// Replacement content for snapshot messages that are no longer current.
pub const STALE_SNAPSHOT: &str = "Stale page summary";
pub const MAIN_TEXT_MAX_CHARS: usize = 1500;

/// Bucket an extracted element is grouped under in the observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "inputs")]
    Input,
    #[serde(rename = "buttons")]
    Button,
    #[serde(rename = "links")]
    Link,
    #[serde(rename = "headings")]
    Heading,
    #[serde(rename = "navigation")]
    Navigation,
    #[serde(rename = "apps")]
    App,
    #[default]
    #[serde(rename = "other")]
    Other,
}

/// Salient attributes kept for an element. Everything else the page reports
/// is dropped at extraction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Attributes {
    /// True when the element carries something a model can recognise it by.
    pub fn is_informative(&self) -> bool {
        [&self.text, &self.value, &self.placeholder, &self.aria_label]
            .into_iter()
            .any(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// One element of a snapshot. Built fresh per extraction and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    #[serde(flatten)]
    pub attributes: Attributes,
    #[serde(skip)]
    pub visible: bool,
    #[serde(skip)]
    pub category: Category,
}

/// Which rule produced a locator. Earlier tiers are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Id = 1,
    Href = 2,
    AriaLabel = 3,
    Text = 4,
    Conjunction = 5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorCandidate {
    /// Index of the descriptor this candidate was synthesized from.
    pub element_ref: usize,
    pub path_expression: String,
    pub priority_tier: PriorityTier,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorResolution {
    pub found: bool,
    pub match_count: usize,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LocatorResolution {
    pub fn is_unique(&self) -> bool {
        self.match_count == 1
    }

    pub fn is_ambiguous(&self) -> bool {
        self.match_count > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Message body: plain text, or text plus an image for vision models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn text_with_image(text: impl Into<String>, png: &[u8]) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        Content::Parts(vec![
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{encoded}"),
                    detail: Some("high".to_string()),
                },
            },
            ContentPart::Text { text: text.into() },
        ])
    }

    /// Only the text portions, joined by spaces.
    pub fn text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A turn in the conversation. Serializes to the common chat-completions shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Content::Text(text.into())),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn user_content(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Self::text(Role::User, "")
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Assistant turn that requested a tool. Content is kept if the model
    /// produced some alongside the call.
    pub fn assistant_tool_call(content: Option<String>, call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: content.map(Content::Text),
            tool_call_id: None,
            name: None,
            tool_calls: Some(vec![call]),
        }
    }

    pub fn tool_result(call: &ToolCall, result: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(Content::Text(result.into())),
            tool_call_id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
            tool_calls: None,
        }
    }

    pub fn text_content(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }

    /// Page summaries only ever arrive as tool results.
    pub fn has_snapshot(&self) -> bool {
        self.role == Role::Tool && matches!(&self.content, Some(c) if c.text().contains(SNAPSHOT_MARKER))
    }
}

/// Recoverable and fatal error classes reported by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NavigationError,
    LocatorNotFound,
    LocatorAmbiguous,
    ToolArgumentError,
    ModelEmptyResponse,
    UnknownTool,
    ActionFailed,
    CapabilityMissing,
    PageClosed,
}

/// What one loop iteration produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionOutcome {
    pub continues_loop: bool,
    pub requires_external_input: bool,
    pub error: Option<ErrorKind>,
}

impl ActionOutcome {
    pub fn proceed() -> Self {
        Self {
            continues_loop: true,
            ..Self::default()
        }
    }

    pub fn awaiting_input() -> Self {
        Self {
            requires_external_input: true,
            ..Self::default()
        }
    }

    pub fn finished() -> Self {
        Self::default()
    }

    pub fn with_error(mut self, kind: ErrorKind) -> Self {
        self.error = Some(kind);
        self
    }
}
