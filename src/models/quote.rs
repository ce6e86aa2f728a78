use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One validated quote extracted from a topic page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub text: String,
    pub author: String,
    pub source_link: Option<String>,
    pub image_url: Option<String>,
    /// Public URL of the uploaded image, filled once the image has been stored.
    pub image_blob_ref: Option<String>,
    /// Position of the container on the page.
    pub extraction_index: u32,
}

/// Why a container did not produce a record.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    TooShort,
    PlaceholderOnly,
    AuthorUnresolved,
    NoContainer,
}

/// Paging parameters for record listings (1-based pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPage {
    pub page: u32,
    pub per_page: u32,
}

impl RecordPage {
    pub const MAX_PER_PAGE: u32 = 200;

    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }

    pub fn limit(&self) -> usize {
        self.per_page as usize
    }
}

impl Default for RecordPage {
    fn default() -> Self {
        Self::new(1, 50)
    }
}
