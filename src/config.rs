use std::time::Duration;

use tracing::warn;

use crate::page::WaitUntil;

/// Limits applied while turning a page into a snapshot.
#[derive(Debug, Clone)]
pub struct ExtractionLimits {
    /// Anchors admitted per snapshot. Excess anchors are dropped in page order.
    pub max_links: usize,
    /// Elements admitted per snapshot, anchors included.
    pub max_elements: usize,
    /// Characters of visible text kept per element.
    pub text_limit: usize,
    pub ignored_tags: Vec<String>,
    /// Anchors whose href contains any of these are skipped as boilerplate.
    pub ignored_href_substrings: Vec<String>,
    /// Remove `href` from link entries once their locator has been built.
    pub strip_link_href: bool,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_links: 40,
            max_elements: 100,
            text_limit: 100,
            ignored_tags: [
                "div", "span", "script", "style", "noscript", "svg", "path", "rect", "g", "meta",
                "link", "hr", "center", "img", "picture",
            ]
            .map(String::from)
            .to_vec(),
            ignored_href_substrings: [
                "policy",
                "policies",
                "facebook",
                "store",
                "googleadservices",
                "instagram",
            ]
            .map(String::from)
            .to_vec(),
            strip_link_href: true,
        }
    }
}

/// History growth bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPolicy {
    /// Most recent snapshot messages kept verbatim.
    pub keep_snapshots: usize,
    /// Ceiling on messages after the system prompt.
    pub max_messages: usize,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            keep_snapshots: 4,
            max_messages: 100,
        }
    }
}

/// One rung of the navigation retry ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationStrategy {
    pub timeout: Duration,
    pub wait_until: WaitUntil,
    pub clear_cookies: bool,
    pub extra_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct NavigationPolicy {
    pub strategies: Vec<NavigationStrategy>,
    /// Delay before retry `n` is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
}

impl Default for NavigationPolicy {
    fn default() -> Self {
        let permissive = vec![
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
            ("Cache-Control".to_string(), "no-cache".to_string()),
        ];
        let mut compressed = permissive.clone();
        compressed.push(("Accept-Encoding".to_string(), "gzip, deflate, br".to_string()));

        Self {
            strategies: vec![
                NavigationStrategy {
                    timeout: Duration::from_secs(15),
                    wait_until: WaitUntil::DomContentLoaded,
                    clear_cookies: false,
                    extra_headers: Vec::new(),
                },
                NavigationStrategy {
                    timeout: Duration::from_secs(30),
                    wait_until: WaitUntil::DomContentLoaded,
                    clear_cookies: true,
                    extra_headers: permissive,
                },
                NavigationStrategy {
                    timeout: Duration::from_secs(45),
                    wait_until: WaitUntil::Load,
                    clear_cookies: true,
                    extra_headers: compressed,
                },
            ],
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl NavigationPolicy {
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub extraction: ExtractionLimits,
    pub history: TrimPolicy,
    pub navigation: NavigationPolicy,
    /// Candidates evaluated per page round trip by the validator.
    pub validation_batch_size: usize,
    /// Upper bound for a single click/type/submit/highlight.
    pub action_timeout: Duration,
    /// Upper bound for one locator probe.
    pub locator_timeout: Duration,
    /// Consecutive empty or failed completions before asking for help.
    pub max_failed_responses: u32,
    /// Tool executions allowed per task before pausing for input.
    pub max_steps_per_task: usize,
    /// Attach a fresh snapshot after clicks and submits.
    pub observe_after_action: bool,
    /// Attach a screenshot to each new task message.
    pub vision: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionLimits::default(),
            history: TrimPolicy::default(),
            navigation: NavigationPolicy::default(),
            validation_batch_size: 25,
            action_timeout: Duration::from_secs(5),
            locator_timeout: Duration::from_secs(2),
            max_failed_responses: 3,
            max_steps_per_task: 25,
            observe_after_action: true,
            vision: false,
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `AGENT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |key: &str, target: &mut usize| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse() {
                    Ok(v) => *target = v,
                    Err(_) => warn!(key, value = %raw, "ignoring malformed config value"),
                }
            }
        };
        read("AGENT_MAX_MESSAGES", &mut config.history.max_messages);
        read("AGENT_KEEP_SNAPSHOTS", &mut config.history.keep_snapshots);
        read("AGENT_MAX_LINKS", &mut config.extraction.max_links);
        read("AGENT_MAX_ELEMENTS", &mut config.extraction.max_elements);
        read("AGENT_MAX_STEPS", &mut config.max_steps_per_task);

        let mut failed = config.max_failed_responses as usize;
        read("AGENT_MAX_FAILED_RESPONSES", &mut failed);
        config.max_failed_responses = failed.max(1) as u32;

        if let Some(raw) = lookup("AGENT_VISION") {
            config.vision = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        config
    }
}
