use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Key prefix for quote images in the bucket.
pub const IMAGE_PREFIX: &str = "quote-images";

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_url: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn object_key(filename: &str) -> String {
        format!("{IMAGE_PREFIX}/{filename}")
    }

    /// Public URL an uploaded image is served from.
    pub fn public_url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.public_url, Self::object_key(filename))
    }

    /// Upload image bytes. Re-uploading the same filename overwrites it in place.
    pub async fn upload_image(
        &self,
        filename: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = Self::object_key(filename);
        let response = self
            .bucket
            .put_object_with_content_type(&key, data, content_type)
            .await?;
        if !(200..300).contains(&response.status_code()) {
            return Err(StorageError::Rejected(response.status_code()));
        }
        Ok(self.public_url_for(filename))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store rejected upload with HTTP {0}")]
    Rejected(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
