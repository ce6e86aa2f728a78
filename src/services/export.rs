//! Record export as JSON or CSV.

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::models::quote::Record;

pub const CSV_HEADER: [&str; 5] = ["text", "author", "link", "image_url", "image_blob_ref"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn render(records: &[Record], format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => to_csv(records),
    }
}

/// RFC 4180 with CRLF line ends.
pub fn to_csv(records: &[Record]) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record([
            record.text.as_str(),
            record.author.as_str(),
            record.source_link.as_deref().unwrap_or(""),
            record.image_url.as_deref().unwrap_or(""),
            record.image_blob_ref.as_deref().unwrap_or(""),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}
