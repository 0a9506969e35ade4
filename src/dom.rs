use std::collections::BTreeMap;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::ExtractionLimits;
use crate::error::PageError;
use crate::page::Page;
use crate::scripts;
use crate::types::{Attributes, Category, ElementDescriptor, MAIN_TEXT_MAX_CHARS};

/// Interactive and content-bearing elements worth showing to the model.
pub const INTERACTIVE_SELECTORS: &[&str] = &[
    "input",
    "button",
    "a[href]",
    "select",
    "textarea",
    "form",
    "label",
    "table",
    "ul",
    "ol",
    "nav",
    "h1",
    "h2",
    "h3",
    "[role='button']",
    "[role='link']",
    "[role='menuitem']",
    "[role='tab']",
    "[onclick]",
    "[class*='button']",
    "[class*='btn']",
    "[type='search']",
    "[aria-label*='search' i]",
    "[class*='menu']",
    "[class*='nav']",
    "iframe",
];

/// Markers left by client-side frameworks. Used to flag SPA pages.
pub const REACT_SELECTORS: &[&str] = &[
    "[data-reactroot]",
    "[data-reactid]",
    "[data-react-helmet]",
    "[class*='React']",
    "[class*='react-']",
    "react-app",
];

pub const VUE_SELECTORS: &[&str] = &["[data-v-app]", "[v-if]", "[v-for]", "[v-bind]", "[v-on]", "[class*='vue']"];

/// Element as reported by the page, before filtering.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawElement {
    pub tag: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub href: Option<String>,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub role: Option<String>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub classes: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub framework_marker: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    elements: Vec<Value>,
    framework: Option<String>,
}

/// Filtered, categorized elements of one page, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub framework: Option<String>,
    pub elements: Vec<ElementDescriptor>,
}

impl Snapshot {
    pub fn counts(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for element in &self.elements {
            *counts.entry(element.category).or_insert(0) += 1;
        }
        counts
    }
}

/// Scan the page and build its snapshot. Read-only.
#[tracing::instrument(skip_all)]
pub async fn extract(page: &dyn Page, limits: &ExtractionLimits) -> Result<Snapshot, PageError> {
    let started = Instant::now();
    let selectors: Vec<&str> = INTERACTIVE_SELECTORS
        .iter()
        .chain(REACT_SELECTORS)
        .chain(VUE_SELECTORS)
        .copied()
        .collect();
    let args = json!({
        "selectors": selectors,
        "textLimit": limits.text_limit,
        "react": REACT_SELECTORS.join(", "),
        "vue": VUE_SELECTORS.join(", "),
    });

    let value = page.evaluate(scripts::EXTRACT_ELEMENTS, args).await?;
    let raw: RawSnapshot =
        serde_json::from_value(value).map_err(|e| PageError::Script(format!("unexpected snapshot shape: {e}")))?;
    let queried = raw.elements.len();
    let elements = filter_elements(raw.elements, limits);

    debug!(
        queried,
        admitted = elements.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extracted page elements"
    );
    Ok(Snapshot {
        framework: raw.framework,
        elements,
    })
}

/// Apply the admission rules in order: ignored tags, uninformative,
/// invisible, then the anchor and total caps. Entries that fail to decode
/// are skipped individually.
pub fn filter_elements(raw: Vec<Value>, limits: &ExtractionLimits) -> Vec<ElementDescriptor> {
    let mut admitted = Vec::new();
    let mut links = 0usize;

    for value in raw {
        if admitted.len() >= limits.max_elements {
            break;
        }
        let element: RawElement = match serde_json::from_value(value) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping undecodable element");
                continue;
            }
        };
        let tag = element.tag.to_lowercase();
        if limits.ignored_tags.iter().any(|t| *t == tag) {
            continue;
        }

        let category = categorize(&element);
        let attributes = clean_attributes(&element, limits.text_limit);
        if !attributes.is_informative() || !element.visible {
            continue;
        }

        if tag == "a" {
            if links >= limits.max_links {
                continue;
            }
            if let Some(href) = attributes.href.as_deref()
                && limits.ignored_href_substrings.iter().any(|s| href.contains(s.as_str()))
            {
                continue;
            }
            links += 1;
        }

        admitted.push(ElementDescriptor {
            tag,
            attributes,
            visible: element.visible,
            category,
        });
    }
    admitted
}

pub fn categorize(element: &RawElement) -> Category {
    let tag = element.tag.to_lowercase();
    let role = element.role.as_deref().unwrap_or_default();
    let classes = element.classes.as_deref().unwrap_or_default();

    match tag.as_str() {
        "input" | "textarea" | "select" => Category::Input,
        "button" => Category::Button,
        _ if role == "button" => Category::Button,
        "a" => Category::Link,
        _ if role == "link" => Category::Link,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Category::Heading,
        "nav" => Category::Navigation,
        _ if role == "navigation" || classes.split_whitespace().any(|c| c.contains("nav")) => Category::Navigation,
        _ if element.framework_marker || tag.contains("react") || tag.contains("vue") => Category::App,
        _ => Category::Other,
    }
}

fn clean_attributes(element: &RawElement, text_limit: usize) -> Attributes {
    let clean = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    Attributes {
        id: clean(&element.id),
        name: clean(&element.name),
        href: clean(&element.href),
        placeholder: clean(&element.placeholder),
        aria_label: clean(&element.aria_label),
        role: clean(&element.role),
        title: clean(&element.title),
        value: clean(&element.value),
        text: clean(&element.text).map(|t| t.chars().take(text_limit).collect()),
    }
}

/// Up to 1500 characters of the page's main content.
pub async fn main_text(page: &dyn Page) -> Result<String, PageError> {
    let value = page
        .evaluate(scripts::MAIN_CONTENT, json!({ "limit": MAIN_TEXT_MAX_CHARS }))
        .await?;
    Ok(value.as_str().unwrap_or("No main content found").to_string())
}

/// Attributes of the element holding keyboard focus, if any.
pub async fn focused_element(page: &dyn Page) -> Result<Option<Value>, PageError> {
    let value = page.evaluate(scripts::FOCUSED_ELEMENT, Value::Null).await?;
    Ok(match value {
        Value::Null => None,
        other => Some(other),
    })
}
