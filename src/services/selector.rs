//! Container selector resolution.
//!
//! The topic page markup is unstable, so the pipeline tries an ordered list of
//! candidate selectors and takes the first one that matches enough elements.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::services::browser::Page;

/// Candidate container selectors, most site-specific first.
pub const DEFAULT_CONTAINER_SELECTORS: &[&str] = &[
    ".bqQt",
    ".grid-item",
    ".clearfix",
    r#"[class*="quote"]"#,
    ".quote-card",
    ".quoteswan",
    "article",
    ".boxy",
];

pub const DEFAULT_MIN_COUNT: usize = 3;

const SELECTOR_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorPolicy {
    pub selector: String,
    pub min_count: usize,
}

impl SelectorPolicy {
    pub fn new(selector: impl Into<String>, min_count: usize) -> Self {
        Self {
            selector: selector.into(),
            min_count,
        }
    }

    pub fn qualifies(&self, count: usize) -> bool {
        count >= self.min_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorChoice {
    pub selector: String,
    pub count: usize,
    /// Position of the chosen policy in the priority list.
    pub priority: usize,
}

/// Pick the first policy, in priority order, whose count qualifies.
///
/// `counts[i]` is the match count for `policies[i]`; missing entries count as zero.
/// A later candidate with more matches never beats an earlier qualifying one.
pub fn choose(policies: &[SelectorPolicy], counts: &[usize]) -> Option<SelectorChoice> {
    policies.iter().enumerate().find_map(|(priority, policy)| {
        let count = counts.get(priority).copied().unwrap_or(0);
        policy.qualifies(count).then(|| SelectorChoice {
            selector: policy.selector.clone(),
            count,
            priority,
        })
    })
}

#[derive(Debug, Clone)]
pub struct SelectorResolver {
    policies: Vec<SelectorPolicy>,
    wait: Duration,
}

impl SelectorResolver {
    pub fn new(policies: Vec<SelectorPolicy>) -> Self {
        Self {
            policies,
            wait: SELECTOR_WAIT,
        }
    }

    pub fn with_min_count(min_count: usize) -> Self {
        Self::new(
            DEFAULT_CONTAINER_SELECTORS
                .iter()
                .map(|s| SelectorPolicy::new(*s, min_count))
                .collect(),
        )
    }

    /// Query the page and return the chosen selector, or `None` when no
    /// candidate qualifies.
    pub async fn resolve(&self, page: &dyn Page) -> Option<SelectorChoice> {
        let mut counts = Vec::with_capacity(self.policies.len());

        for policy in &self.policies {
            let count = match page.wait_for_selector(&policy.selector, self.wait).await {
                Ok(()) => page.count(&policy.selector).await.unwrap_or(0),
                Err(e) => {
                    debug!(selector = %policy.selector, error = %e, "Selector wait failed");
                    0
                }
            };
            debug!(selector = %policy.selector, count, "Counted container selector");
            counts.push(count);

            // First qualifying wins, so later candidates need not be queried.
            if policy.qualifies(count) {
                break;
            }
        }

        let choice = choose(&self.policies, &counts);
        if let Some(choice) = &choice {
            info!(selector = %choice.selector, count = choice.count, "Resolved container selector");
        }
        choice
    }
}

impl Default for SelectorResolver {
    fn default() -> Self {
        Self::with_min_count(DEFAULT_MIN_COUNT)
    }
}
