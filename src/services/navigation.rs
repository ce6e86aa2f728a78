//! Navigation Guard: bounded-retry page loads with block/challenge detection.

use std::time::Duration;

use tracing::{info, warn};

use crate::services::browser::{BrowserError, Page};

/// Phrases that identify an anti-automation or rate-limit page.
pub const DEFAULT_BLOCK_INDICATORS: &[&str] = &[
    "403 forbidden",
    "access denied",
    "checking your browser",
    "just a moment",
    "attention required",
    "security check",
    "captcha",
    "too many requests",
    "cf-challenge",
    "challenge-platform",
];

pub const MIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Ready,
    /// The page loaded but looks like a block page. Not retried.
    Blocked { indicator: String },
    /// Every attempt raised.
    Failed { attempts: u32, last_error: String },
}

#[derive(Debug, Clone)]
pub struct NavigationGuard {
    max_attempts: u32,
    retry_delay: Duration,
    settle_delay: Duration,
    timeout: Duration,
    indicators: Vec<String>,
}

impl NavigationGuard {
    /// `max_attempts` below [`MIN_ATTEMPTS`] is raised to it.
    pub fn new(max_attempts: u32, retry_delay: Duration, settle_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(MIN_ATTEMPTS),
            retry_delay,
            settle_delay,
            timeout,
            indicators: DEFAULT_BLOCK_INDICATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn navigate(&self, page: &mut dyn Page, url: &str) -> NavigationOutcome {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.load(page, url).await {
                Ok(()) => {
                    info!(url, attempt, "Page loaded");
                    tokio::time::sleep(self.settle_delay).await;
                    return match self.detect_block(page).await {
                        Some(indicator) => {
                            warn!(url, indicator = %indicator, "Block page detected");
                            NavigationOutcome::Blocked { indicator }
                        }
                        None => NavigationOutcome::Ready,
                    };
                }
                Err(e) => {
                    warn!(url, attempt, max_attempts = self.max_attempts, error = %e, "Navigation attempt failed");
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        NavigationOutcome::Failed {
            attempts: self.max_attempts,
            last_error,
        }
    }

    /// A page implementation that ignores its own timeout still gets cut off here.
    async fn load(&self, page: &mut dyn Page, url: &str) -> Result<(), BrowserError> {
        match tokio::time::timeout(self.timeout, page.goto(url, self.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout(self.timeout)),
        }
    }

    async fn detect_block(&self, page: &dyn Page) -> Option<String> {
        let content = page.content().await.unwrap_or_default().to_lowercase();
        let title = page.title().await.unwrap_or_default().to_lowercase();
        self.indicators
            .iter()
            .find(|indicator| content.contains(indicator.as_str()) || title.contains(indicator.as_str()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::services::snapshot::ContainerSnapshot;

    /// Fails the first `failures` loads, then serves `html`.
    struct FlakyPage {
        failures: u32,
        calls: Arc<AtomicU32>,
        html: String,
        loaded: bool,
    }

    impl FlakyPage {
        fn new(failures: u32, html: &str) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let page = Self {
                failures,
                calls: Arc::clone(&calls),
                html: html.to_string(),
                loaded: false,
            };
            (page, calls)
        }
    }

    #[async_trait]
    impl Page for FlakyPage {
        async fn goto(&mut self, _url: &str, timeout: Duration) -> Result<(), BrowserError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(BrowserError::Timeout(timeout));
            }
            self.loaded = true;
            Ok(())
        }

        async fn content(&self) -> Result<String, BrowserError> {
            if self.loaded {
                Ok(self.html.clone())
            } else {
                Err(BrowserError::NotLoaded)
            }
        }

        async fn title(&self) -> Result<String, BrowserError> {
            Ok(String::new())
        }

        async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn count(&self, _selector: &str) -> Result<usize, BrowserError> {
            Ok(0)
        }

        async fn snapshot(&self, _selector: &str, _index: usize) -> Result<Option<ContainerSnapshot>, BrowserError> {
            Ok(None)
        }

        async fn diagnostic_snapshot(&self) -> Result<String, BrowserError> {
            self.content().await
        }
    }

    fn guard(attempts: u32) -> NavigationGuard {
        NavigationGuard::new(attempts, Duration::ZERO, Duration::ZERO, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_retries_then_ready() {
        let (mut page, calls) = FlakyPage::new(2, "<html><body>quotes</body></html>");
        assert_eq!(guard(3).navigate(&mut page, "http://x.test").await, NavigationOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail() {
        let (mut page, calls) = FlakyPage::new(10, "");
        let outcome = guard(3).navigate(&mut page, "http://x.test").await;
        assert!(matches!(outcome, NavigationOutcome::Failed { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_block_page_is_not_retried() {
        let (mut page, calls) = FlakyPage::new(0, "<title>Hold on</title><p>Checking your browser before accessing</p>");
        let outcome = guard(3).navigate(&mut page, "http://x.test").await;
        assert_eq!(
            outcome,
            NavigationOutcome::Blocked {
                indicator: "checking your browser".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attempts_have_a_floor() {
        assert_eq!(guard(1).max_attempts(), MIN_ATTEMPTS);
        assert_eq!(guard(5).max_attempts(), 5);
    }
}
