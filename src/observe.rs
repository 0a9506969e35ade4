use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::config::AgentConfig;
use crate::dom::{self, Snapshot};
use crate::error::PageError;
use crate::locator;
use crate::page::Page;
use crate::types::{Category, SNAPSHOT_MARKER};
use crate::validator::{self, Resolved};

const NO_MAIN_CONTENT: &str = "No main content found";

/// What the model is shown about the current page.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// `{total_elements, elements_by_type, framework?, elements}`.
    pub document: Value,
    pub main_text: String,
    /// Present only when focus was requested.
    pub focused: Option<Option<Value>>,
}

impl Observation {
    /// Tool-result text. Starts with the snapshot marker.
    pub fn render(&self) -> String {
        let json = serde_json::to_string_pretty(&self.document).unwrap_or_else(|_| self.document.to_string());
        let mut text = format!("{SNAPSHOT_MARKER}\n{json}\n\nMAIN TEXT:\n{}", self.main_text);
        match &self.focused {
            Some(Some(focused)) => text.push_str(&format!("\n\nFOCUSED ELEMENT:\n{focused}")),
            Some(None) => text.push_str("\n\nFOCUSED ELEMENT:\nNo element currently focused"),
            None => {}
        }
        text
    }

    pub fn total_elements(&self) -> usize {
        self.document["total_elements"].as_u64().unwrap_or(0) as usize
    }
}

/// Extract, synthesize, validate and assemble one observation.
pub async fn observe(page: &dyn Page, config: &AgentConfig, with_focus: bool) -> Result<Observation, PageError> {
    let snapshot = dom::extract(page, &config.extraction).await?;
    let candidates = locator::synthesize_all(&snapshot.elements);
    let resolved = validator::validate(
        page,
        candidates,
        config.validation_batch_size,
        config.locator_timeout,
    )
    .await?;
    let document = build_document(&snapshot, &resolved, config.extraction.strip_link_href);

    let main_text = match dom::main_text(page).await {
        Ok(text) => text,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "main content extraction failed");
            NO_MAIN_CONTENT.to_string()
        }
    };

    let focused = if with_focus {
        match dom::focused_element(page).await {
            Ok(focused) => Some(focused),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "focused element lookup failed");
                Some(None)
            }
        }
    } else {
        None
    };

    Ok(Observation {
        document,
        main_text,
        focused,
    })
}

/// Group validated elements by category. Entries whose expression the page
/// rejected are left out; missing and ambiguous ones stay, annotated.
pub fn build_document(snapshot: &Snapshot, resolved: &[Resolved], strip_link_href: bool) -> Value {
    let mut groups: BTreeMap<Category, Vec<Value>> = BTreeMap::new();

    for item in resolved {
        if item.probe.invalid {
            continue;
        }
        let Some(element) = snapshot.elements.get(item.candidate.element_ref) else {
            continue;
        };
        let mut entry = match serde_json::to_value(element) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if strip_link_href && element.category == Category::Link {
            entry.remove("href");
        }
        entry.insert("xpath_selector".into(), json!(item.candidate.path_expression));

        let resolution = &item.probe.resolution;
        if resolution.is_ambiguous() {
            entry.insert("match_count".into(), json!(resolution.match_count));
        }
        if !resolution.found
            && let Some(error) = &resolution.error
        {
            entry.insert("locator_error".into(), json!(error));
        }
        groups.entry(element.category).or_default().push(Value::Object(entry));
    }

    let counts: BTreeMap<Category, usize> = groups.iter().map(|(c, v)| (*c, v.len())).collect();
    let mut document = json!({
        "total_elements": counts.values().sum::<usize>(),
        "elements_by_type": counts,
        "elements": groups,
    });
    if let Some(framework) = &snapshot.framework {
        document["framework"] = json!(framework);
    }
    document
}
