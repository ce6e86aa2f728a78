use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it jobs live in memory only.
    pub database_url: Option<String>,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// Public base URL uploaded images are served from
    pub r2_public_url: Option<String>,

    /// Site the topic pages are read from
    #[serde(default = "default_site_base_url")]
    pub site_base_url: String,

    #[serde(default = "default_image_cache_dir")]
    pub image_cache_dir: PathBuf,

    /// Where HTML snapshots of failed page loads are written
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: PathBuf,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_navigation_attempts")]
    pub navigation_attempts: u32,

    #[serde(default = "default_navigation_retry_delay_secs")]
    pub navigation_retry_delay_secs: u64,

    /// Grace period after a page load before the page is inspected
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,

    /// Concurrent image downloads per job
    #[serde(default = "default_image_concurrency")]
    pub image_concurrency: usize,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_min_container_count")]
    pub min_container_count: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_site_base_url() -> String {
    "https://www.brainyquote.com".to_string()
}

fn default_image_cache_dir() -> PathBuf {
    PathBuf::from("cached_images")
}

fn default_diagnostics_dir() -> PathBuf {
    PathBuf::from("diagnostics")
}

fn default_navigation_timeout_secs() -> u64 {
    60
}

fn default_navigation_attempts() -> u32 {
    3
}

fn default_navigation_retry_delay_secs() -> u64 {
    5
}

fn default_settle_delay_secs() -> u64 {
    5
}

fn default_image_timeout_secs() -> u64 {
    30
}

fn default_image_concurrency() -> usize {
    4
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_min_container_count() -> usize {
    3
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid SITE_BASE_URL: {0}")]
    SiteUrl(#[from] url::ParseError),

    #[error("{0} is required when DATABASE_URL is set")]
    MissingStorage(&'static str),
}

/// R2 settings, all present together.
#[derive(Debug, Clone)]
pub struct R2Settings {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub public_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    pub fn r2_settings(&self) -> Result<R2Settings, ConfigError> {
        fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingStorage(name))
        }

        Ok(R2Settings {
            bucket: required(&self.r2_bucket, "R2_BUCKET")?,
            endpoint: required(&self.r2_endpoint, "R2_ENDPOINT")?,
            access_key: required(&self.r2_access_key, "R2_ACCESS_KEY")?,
            secret_key: required(&self.r2_secret_key, "R2_SECRET_KEY")?,
            public_url: required(&self.r2_public_url, "R2_PUBLIC_URL")?,
        })
    }

    pub fn scrape_settings(&self) -> Result<ScrapeSettings, ConfigError> {
        Ok(ScrapeSettings {
            site_base_url: Url::parse(&self.site_base_url)?,
            image_cache_dir: self.image_cache_dir.clone(),
            diagnostics_dir: self.diagnostics_dir.clone(),
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            navigation_attempts: self.navigation_attempts,
            navigation_retry_delay: Duration::from_secs(self.navigation_retry_delay_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            image_concurrency: self.image_concurrency.max(1),
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            min_container_count: self.min_container_count.max(1),
            user_agent: self.user_agent.clone(),
        })
    }
}

/// Everything the scraping pipeline needs to know about its environment.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub site_base_url: Url,
    pub image_cache_dir: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub navigation_timeout: Duration,
    pub navigation_attempts: u32,
    pub navigation_retry_delay: Duration,
    pub settle_delay: Duration,
    pub image_timeout: Duration,
    pub image_concurrency: usize,
    pub max_concurrent_jobs: usize,
    pub min_container_count: usize,
    pub user_agent: String,
}

impl ScrapeSettings {
    /// `{base}/topics/{topic}-quotes` with the topic lower-cased and spaces as dashes.
    pub fn topic_url(&self, topic: &str) -> Result<Url, url::ParseError> {
        let slug = topic
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase();
        self.site_base_url.join(&format!("/topics/{slug}-quotes"))
    }
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            site_base_url: Url::parse("https://www.brainyquote.com").expect("static URL"),
            image_cache_dir: default_image_cache_dir(),
            diagnostics_dir: default_diagnostics_dir(),
            navigation_timeout: Duration::from_secs(default_navigation_timeout_secs()),
            navigation_attempts: default_navigation_attempts(),
            navigation_retry_delay: Duration::from_secs(default_navigation_retry_delay_secs()),
            settle_delay: Duration::from_secs(default_settle_delay_secs()),
            image_timeout: Duration::from_secs(default_image_timeout_secs()),
            image_concurrency: default_image_concurrency(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            min_container_count: default_min_container_count(),
            user_agent: default_user_agent(),
        }
    }
}
