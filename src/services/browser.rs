//! Page-loading capability used by the extraction pipeline.
//!
//! The pipeline only talks to [`Browser`] and [`Page`]. [`HttpBrowser`] is the
//! shipped implementation: it fetches documents with `reqwest` and answers DOM
//! queries with `scraper` over the fetched HTML.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};

use crate::services::snapshot::{self, ContainerSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Navigation timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with HTTP {0}")]
    Status(StatusCode),

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Selector {0} did not appear")]
    SelectorTimeout(String),

    #[error("No page loaded")]
    NotLoaded,
}

/// Factory for fresh page sessions.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Page>, BrowserError>;
}

/// A single loaded page.
#[async_trait]
pub trait Page: Send + Sync {
    /// Load `url`, returning once the network is quiescent.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Full HTML of the current document.
    async fn content(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Number of elements matching `selector` in the whole document.
    async fn count(&self, selector: &str) -> Result<usize, BrowserError>;

    /// Capture the `index`-th element matching `selector`.
    async fn snapshot(
        &self,
        selector: &str,
        index: usize,
    ) -> Result<Option<ContainerSnapshot>, BrowserError>;

    /// Rendered document for post-mortem inspection.
    async fn diagnostic_snapshot(&self) -> Result<String, BrowserError>;
}

/// Browser backed by plain HTTP fetches.
#[derive(Clone)]
pub struct HttpBrowser {
    http: reqwest::Client,
}

impl HttpBrowser {
    pub fn new(user_agent: &str) -> Result<Self, BrowserError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(default_headers())
            .build()?;
        Ok(Self { http })
    }
}

fn default_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open(&self) -> Result<Box<dyn Page>, BrowserError> {
        Ok(Box::new(HttpPage::new(self.http.clone())))
    }
}

/// Page whose document is a fetched HTML string.
pub struct HttpPage {
    http: reqwest::Client,
    document: Option<Document>,
}

type Matches = Arc<Vec<ContainerSnapshot>>;

/// A loaded document. Each selector is matched against a fresh parse once,
/// then served from the captured snapshots until the next `goto`.
struct Document {
    status: StatusCode,
    html: String,
    title: Option<String>,
    matches: Mutex<HashMap<String, Matches>>,
}

impl Document {
    fn new(status: StatusCode, html: String) -> Self {
        let title = document_title(&html);
        Self {
            status,
            html,
            title,
            matches: Mutex::new(HashMap::new()),
        }
    }

    fn select(&self, css: &str) -> Result<Matches, BrowserError> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = matches.get(css) {
            return Ok(Arc::clone(found));
        }
        let found = Arc::new(capture_all(&self.html, css)?);
        matches.insert(css.to_string(), Arc::clone(&found));
        Ok(found)
    }
}

impl HttpPage {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http, document: None }
    }

    /// A page with a preloaded document.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            document: Some(Document::new(StatusCode::OK, html.into())),
        }
    }

    fn document(&self) -> Result<&Document, BrowserError> {
        self.document.as_ref().ok_or(BrowserError::NotLoaded)
    }

    #[cfg(test)]
    fn parsed_selectors(&self) -> Vec<String> {
        let Some(document) = &self.document else {
            return Vec::new();
        };
        let matches = document.matches.lock().unwrap_or_else(PoisonError::into_inner);
        let mut selectors: Vec<String> = matches.keys().cloned().collect();
        selectors.sort();
        selectors
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrowserError::Timeout(timeout)
                } else {
                    BrowserError::Http(e)
                }
            })?;

        let status = response.status();
        // Block pages come back as 403/429; keep them loaded so they can be inspected.
        if !status.is_success()
            && status != StatusCode::FORBIDDEN
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            return Err(BrowserError::Status(status));
        }

        let body = response.text().await?;
        self.document = Some(Document::new(status, body));
        Ok(())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.document()?.html.clone())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        let document = self.document()?;
        match &document.title {
            Some(title) => Ok(title.clone()),
            None if !document.status.is_success() => Ok(document.status.to_string()),
            None => Ok(String::new()),
        }
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        // A fetched document never changes, so the selector is either there or not.
        if self.document()?.select(selector)?.is_empty() {
            Err(BrowserError::SelectorTimeout(selector.to_string()))
        } else {
            Ok(())
        }
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        Ok(self.document()?.select(selector)?.len())
    }

    async fn snapshot(
        &self,
        selector: &str,
        index: usize,
    ) -> Result<Option<ContainerSnapshot>, BrowserError> {
        Ok(self.document()?.select(selector)?.get(index).cloned())
    }

    async fn diagnostic_snapshot(&self) -> Result<String, BrowserError> {
        self.content().await
    }
}

fn parse_selector(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|e| BrowserError::Selector(format!("{css}: {e}")))
}

/// Capture every element matching `css`, in document order.
fn capture_all(html: &str, css: &str) -> Result<Vec<ContainerSnapshot>, BrowserError> {
    let selector = parse_selector(css)?;
    let document = Html::parse_document(html);
    let captured = document.select(&selector).map(snapshot::capture).collect();
    Ok(captured)
}

fn document_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let title = document
        .select(&selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Motivational Quotes</title></head><body>
        <div class="bqQt"><a href="/quotes/a_1" title="view quote">One</a></div>
        <div class="bqQt"><a href="/quotes/b_2" title="view quote">Two</a></div>
        </body></html>"#;

    #[tokio::test]
    async fn test_preloaded_page_queries() {
        let page = HttpPage::from_html(PAGE);
        assert_eq!(page.title().await.unwrap(), "Motivational Quotes");
        assert_eq!(page.count(".bqQt").await.unwrap(), 2);
        assert_eq!(page.count(".missing").await.unwrap(), 0);

        let second = page.snapshot(".bqQt", 1).await.unwrap().unwrap();
        assert_eq!(second.view_link.unwrap().href.as_deref(), Some("/quotes/b_2"));
        assert!(page.snapshot(".bqQt", 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_selector_on_static_document() {
        let page = HttpPage::from_html(PAGE);
        assert!(page.wait_for_selector(".bqQt", Duration::from_secs(1)).await.is_ok());
        assert!(matches!(
            page.wait_for_selector(".grid-item", Duration::from_secs(1)).await,
            Err(BrowserError::SelectorTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_unloaded_page_errors() {
        let page = HttpPage::new(reqwest::Client::new());
        assert!(matches!(page.content().await, Err(BrowserError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_invalid_selector_is_reported() {
        let page = HttpPage::from_html(PAGE);
        assert!(matches!(page.count("[[").await, Err(BrowserError::Selector(_))));
        assert!(page.parsed_selectors().is_empty());
    }

    #[tokio::test]
    async fn test_each_selector_is_parsed_once() {
        let page = HttpPage::from_html(PAGE);
        page.wait_for_selector(".bqQt", Duration::from_secs(1)).await.unwrap();
        assert_eq!(page.count(".bqQt").await.unwrap(), 2);
        for index in 0..3 {
            page.snapshot(".bqQt", index).await.unwrap();
        }
        assert_eq!(page.parsed_selectors(), vec![".bqQt"]);

        assert_eq!(page.count(".grid-item").await.unwrap(), 0);
        assert_eq!(page.parsed_selectors(), vec![".bqQt", ".grid-item"]);
    }
}
