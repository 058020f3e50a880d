//! OCR page/document in-memory projections (spec §3 "Page (OCR)", "Document (OCR)").

use serde::{Deserialize, Serialize};

/// One field extracted for an inscription line, optionally offered as
/// multiple confidence-scored options (spec §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: Option<String>,
    pub confidence: f32,
}

/// Structured fields a windowed extraction may attach to one line
/// (spec §4.9 step 4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredLineFields {
    pub parties: Option<String>,
    pub nature: Option<String>,
    pub date: Option<String>,
    pub publication_number: Option<String>,
    pub radiation_number: Option<String>,
    pub remarks: Option<String>,
}

/// One extracted line within a page (spec §3 "Page (OCR)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLine {
    pub index: u32,
    pub raw_text: String,
    pub structured: Option<StructuredLineFields>,
    pub confidence: f32,
}

/// A single rasterized PDF page plus its extraction result (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Line-count consensus from step 3, driving the windowed-extraction
    /// loop in step 4 (spec §4.9).
    pub line_count: Option<u32>,
    /// Confidence of `line_count`: 1.0 when both models agreed within 1,
    /// reduced when the pipeline had to fall back to the larger of two
    /// disagreeing counts (spec §4.9 step 3).
    pub line_count_confidence: f32,
    pub lines: Vec<ExtractedLine>,
    /// Set when the page-level pipeline step failed; the page is still
    /// stored (empty `lines`) so the document isn't failed outright
    /// (spec §4.9 "Failure semantics").
    pub failed: bool,
}

impl Page {
    pub fn empty(page_number: u32, width: u32, height: u32, image_bytes: Vec<u8>) -> Self {
        Self {
            page_number,
            image_bytes,
            width,
            height,
            line_count: None,
            line_count_confidence: 1.0,
            lines: Vec::new(),
            failed: false,
        }
    }
}

/// A full OCR'd document: its pages plus consensus/completion metadata
/// (spec §3 "Document (OCR)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
    pub is_completed: bool,
}

impl Document {
    pub fn new(pages: Vec<Page>) -> Self {
        let is_completed = !pages.is_empty() && pages.iter().all(|p| !p.failed);
        Self { pages, is_completed }
    }

    pub fn total_lines(&self) -> usize {
        self.pages.iter().map(|p| p.lines.len()).sum()
    }
}
