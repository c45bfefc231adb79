//! Per-format text extraction.
//!
//! [`extract`] never fails: a corrupt or unsupported file produces an [`Extraction`] with
//! `success == false` and an `error` description so one bad upload cannot abort a job.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub mod docx;
pub mod image;
pub mod pdf;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Image,
}

impl DocumentFormat {
    /// Resolves the format once, from the declared MIME type and, when that is generic or
    /// missing, from the filename extension.
    pub fn detect(mime: &str, filename: &str) -> Option<Self> {
        Self::from_mime(mime).or_else(|| {
            mime_guess::from_path(filename)
                .first()
                .and_then(|guess| Self::from_mime(guess.essence_str()))
        })
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            MIME_PDF => Some(DocumentFormat::Pdf),
            MIME_DOCX => Some(DocumentFormat::Docx),
            value if value.starts_with("image/") => Some(DocumentFormat::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Image => "image",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page (PDF) or paragraph (DOCX) of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextUnit {
    pub page: Option<u32>,
    pub text: String,
}

pub type Table = Vec<Vec<String>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub format: Option<DocumentFormat>,
    pub success: bool,
    pub full_text: String,
    pub units: Vec<TextUnit>,
    pub tables: Vec<Table>,
    pub metadata: BTreeMap<String, String>,
    pub is_image: bool,
    pub error: Option<String>,
}

impl Extraction {
    pub fn failed(format: Option<DocumentFormat>, error: impl Into<String>) -> Self {
        Self {
            format,
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn has_text(&self) -> bool {
        !self.full_text.trim().is_empty()
    }
}

pub fn extract(bytes: &[u8], format: DocumentFormat) -> Extraction {
    match format {
        DocumentFormat::Pdf => pdf::extract(bytes),
        DocumentFormat::Docx => docx::extract(bytes),
        DocumentFormat::Image => image::extract(bytes),
    }
}

/// Detects the format and extracts; unsupported types yield a failed extraction.
pub fn extract_file(bytes: &[u8], mime: &str, filename: &str) -> Extraction {
    match DocumentFormat::detect(mime, filename) {
        Some(format) => extract(bytes, format),
        None => Extraction::failed(None, format!("unsupported file type: {mime}")),
    }
}
