//! Image download with a local, filename-keyed cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::image::ImageAsset;

const DEFAULT_EXTENSION: &str = "jpg";
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Why an image could not be obtained. Never fatal to the record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageFailure {
    #[error("image request timed out")]
    Timeout,

    #[error("image request failed: {0}")]
    Transport(String),

    #[error("image server responded with HTTP {0}")]
    Status(u16),

    #[error("image response was empty")]
    Empty,

    #[error("image cache write failed: {0}")]
    Cache(String),
}

/// Filename for an image: `quote_{key}_{digest}.{ext}`.
///
/// The digest is the first 8 hex chars of SHA-256 over the URL, so the same URL
/// and key always map to the same file while different keys never collide.
pub fn image_filename(url: &str, dedupe_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!(
        "quote_{}_{}.{}",
        sanitize_key(dedupe_key),
        &digest[..8],
        extension_for(url)
    )
}

/// Dedupe key for a record: author plus page position.
pub fn dedupe_key(author: &str, index: u32) -> String {
    format!("{author}_{index}")
}

fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

fn extension_for(url: &str) -> &'static str {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    path.rsplit_once('.')
        .and_then(|(_, ext)| KNOWN_EXTENSIONS.iter().find(|known| **known == ext))
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}

fn sniff_content_type(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/jpeg".to_string())
}

/// Downloads images into a cache directory shared by all jobs.
pub struct ImageFetcher {
    http: reqwest::Client,
    cache_dir: PathBuf,
    timeout: Duration,
}

impl ImageFetcher {
    pub fn new(http: reqwest::Client, cache_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            http,
            cache_dir: cache_dir.into(),
            timeout,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fetch `url` into the cache under a name derived from `dedupe_key`.
    ///
    /// Idempotent per filename: when the file already exists it is read back
    /// instead of downloaded.
    pub async fn fetch(&self, url: &str, dedupe_key: &str) -> Result<ImageAsset, ImageFailure> {
        let filename = image_filename(url, dedupe_key);
        let local_path = self.cache_dir.join(&filename);

        if let Some(bytes) = read_cached(&local_path).await {
            debug!(filename = %filename, "Image already cached");
            return Ok(ImageAsset {
                source_url: url.to_string(),
                content_type: sniff_content_type(&bytes),
                filename,
                bytes,
                local_path,
            });
        }

        let (bytes, header_type) = self.download(url).await?;
        let content_type = header_type
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or_else(|| sniff_content_type(&bytes));

        self.write_cache(&local_path, &bytes).await?;
        debug!(filename = %filename, size = bytes.len(), "Image downloaded");

        Ok(ImageAsset {
            source_url: url.to_string(),
            filename,
            bytes,
            content_type,
            local_path,
        })
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), ImageFailure> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageFailure::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let bytes = response.bytes().await.map_err(transport_failure)?;
        if bytes.is_empty() {
            return Err(ImageFailure::Empty);
        }
        Ok((bytes.to_vec(), content_type))
    }

    /// Write through a temp file so concurrent jobs never observe a partial image.
    async fn write_cache(&self, path: &Path, bytes: &[u8]) -> Result<(), ImageFailure> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| ImageFailure::Cache(e.to_string()))?;

        let tmp = path.with_extension(format!("{}.part", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ImageFailure::Cache(e.to_string()))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ImageFailure::Cache(e.to_string()));
        }
        Ok(())
    }

    /// Start a per-run session that de-duplicates by source URL.
    pub fn session(self: &Arc<Self>) -> ImageSession {
        ImageSession {
            fetcher: Arc::clone(self),
            by_url: Mutex::new(HashMap::new()),
        }
    }
}

fn transport_failure(e: reqwest::Error) -> ImageFailure {
    if e.is_timeout() {
        ImageFailure::Timeout
    } else {
        ImageFailure::Transport(e.to_string())
    }
}

async fn read_cached(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cached image, downloading again");
            None
        }
    }
}

type AssetCell = Arc<OnceCell<Arc<ImageAsset>>>;

/// Image fetches for one job run. Repeated URLs resolve to the first asset.
pub struct ImageSession {
    fetcher: Arc<ImageFetcher>,
    by_url: Mutex<HashMap<String, AssetCell>>,
}

impl ImageSession {
    pub async fn fetch(&self, url: &str, dedupe_key: &str) -> Result<Arc<ImageAsset>, ImageFailure> {
        let cell = {
            let mut by_url = self
                .by_url
                .lock()
                .map_err(|_| ImageFailure::Cache("image session lock poisoned".to_string()))?;
            Arc::clone(by_url.entry(url.to_string()).or_default())
        };

        // Failures leave the cell empty so a later record can retry the URL.
        cell.get_or_try_init(|| async {
            self.fetcher.fetch(url, dedupe_key).await.map(Arc::new)
        })
        .await
        .map(Arc::clone)
    }
}
