use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::PageError;
use crate::page::Page;
use crate::scripts;
use crate::types::{LocatorCandidate, LocatorResolution};

pub const NOT_FOUND: &str = "no element matches this path";
/// Matches described when a single locator turns out to be ambiguous.
const DESCRIBE_LIMIT: usize = 5;

#[derive(Debug, Default, Deserialize)]
struct RawProbe {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    visible: bool,
    error: Option<String>,
    #[serde(default)]
    matches: Vec<String>,
}

/// Result of testing one path expression against the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub resolution: LocatorResolution,
    /// The page rejected the expression itself.
    pub invalid: bool,
    /// Short descriptions of the first few matches, when requested.
    pub matches: Vec<String>,
}

impl From<RawProbe> for Probe {
    fn from(raw: RawProbe) -> Self {
        let invalid = raw.error.is_some();
        let error = match raw.error {
            Some(e) => Some(format!("invalid path expression: {e}")),
            None if raw.count == 0 => Some(NOT_FOUND.to_string()),
            None => None,
        };
        Probe {
            resolution: LocatorResolution {
                found: raw.count > 0 && !invalid,
                match_count: raw.count,
                visible: raw.count == 1 && raw.visible,
                error,
            },
            invalid,
            matches: raw.matches,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub candidate: LocatorCandidate,
    pub probe: Probe,
}

/// Annotate every candidate with its resolution, in input order.
///
/// Candidates are tested `batch_size` at a time in one page round trip each.
/// A batch that fails, or returns the wrong number of results, is retried
/// one candidate at a time. Only a lost page is returned as an error.
#[tracing::instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn validate(
    page: &dyn Page,
    candidates: Vec<LocatorCandidate>,
    batch_size: usize,
    timeout: Duration,
) -> Result<Vec<Resolved>, PageError> {
    let started = Instant::now();
    let mut resolved = Vec::with_capacity(candidates.len());
    let mut fallbacks = 0usize;

    for chunk in candidates.chunks(batch_size.max(1)) {
        let selectors: Vec<&str> = chunk.iter().map(|c| c.path_expression.as_str()).collect();
        let batch = evaluate(page, scripts::PROBE_BATCH, json!({ "selectors": selectors }), timeout).await;

        let probes = match batch.map(serde_json::from_value::<Vec<RawProbe>>) {
            Ok(Ok(probes)) if probes.len() == chunk.len() => Some(probes),
            Ok(Ok(probes)) => {
                warn!(expected = chunk.len(), got = probes.len(), "batch probe returned wrong length");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "batch probe returned unexpected shape");
                None
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "batch probe failed");
                None
            }
        };

        match probes {
            Some(probes) => {
                for (candidate, raw) in chunk.iter().zip(probes) {
                    resolved.push(Resolved {
                        candidate: candidate.clone(),
                        probe: raw.into(),
                    });
                }
            }
            None => {
                fallbacks += 1;
                for candidate in chunk {
                    let probe = match probe_one(page, &candidate.path_expression, 0, timeout).await {
                        Ok(probe) => probe,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => Probe {
                            resolution: LocatorResolution {
                                error: Some(e.to_string()),
                                ..LocatorResolution::default()
                            },
                            invalid: false,
                            matches: Vec::new(),
                        },
                    };
                    resolved.push(Resolved {
                        candidate: candidate.clone(),
                        probe,
                    });
                }
            }
        }
    }

    debug!(
        resolved = resolved.len(),
        fallbacks,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "validated locators"
    );
    Ok(resolved)
}

/// Test one expression before acting on it. Ambiguous results carry short
/// descriptions of the first few matches.
pub async fn resolve(page: &dyn Page, xpath: &str, timeout: Duration) -> Result<Probe, PageError> {
    probe_one(page, xpath, DESCRIBE_LIMIT, timeout).await
}

async fn probe_one(page: &dyn Page, xpath: &str, limit: usize, timeout: Duration) -> Result<Probe, PageError> {
    let value = evaluate(
        page,
        scripts::DESCRIBE_MATCHES,
        json!({ "selector": xpath, "limit": limit }),
        timeout,
    )
    .await?;
    let raw: RawProbe =
        serde_json::from_value(value).map_err(|e| PageError::Script(format!("unexpected probe shape: {e}")))?;
    Ok(raw.into())
}

async fn evaluate(page: &dyn Page, script: &str, args: Value, timeout: Duration) -> Result<Value, PageError> {
    match tokio::time::timeout(timeout, page.evaluate(script, args)).await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout(format!("locator query exceeded {}ms", timeout.as_millis()))),
    }
}
