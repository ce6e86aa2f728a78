use std::path::PathBuf;

/// Downloaded image bytes keyed by their generated filename.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub source_url: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub local_path: PathBuf,
}

impl ImageAsset {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
