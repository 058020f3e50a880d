//! Linear OCR pipeline (spec §4.9):
//! `PdfBytes -> [Page] -> [PageWithLineCount] -> [PageWithExtraction] -> Document -> StructuredDocument`.
//!
//! Grounded on SPEC_FULL §5's "promise-chained pipeline" redesign note: each
//! stage is a plain async function with an explicit intermediate type, so
//! the pipeline is restartable at any stage because the job row already
//! persists each stage's output (`raw_ocr_content`, `structured_content`).

use image::imageops::FilterType;
use thiserror::Error;

use crate::config::OcrPipelineConfig;
use crate::models::{ExtractedLine, OcrDocument, Page};
use crate::ocr::rate_limiter::RateLimiter;
use crate::ocr::sanitizer::{sanitize, SanitizedDocument};
use crate::ocr::vision::{VisionClient, VisionResponse};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("malformed input: not a PDF")]
    MalformedInput,
    #[error("unreasonable line count on page {page}: {count}")]
    UnreasonableLineCount { page: u32, count: u32 },
    #[error("rasterization failed: {0}")]
    Rasterize(String),
    #[error("vision model call failed: {0}")]
    Vision(#[from] crate::ocr::vision::VisionError),
    #[error("rate limiter failed: {0}")]
    RateLimit(#[from] crate::ocr::rate_limiter::RateLimitError),
}

const PDF_MAGIC: &[u8] = b"%PDF";

/// Stage 1: validates the fetched bytes look like a PDF (spec §4.9 step 1).
pub fn validate_pdf(bytes: &[u8]) -> Result<(), OcrError> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(OcrError::MalformedInput);
    }
    Ok(())
}

/// Stage 2: rasterizes each page to a PNG at the configured DPI, applying
/// capped Lanczos-3 upscaling (spec §4.9 step 2). Uses `pdfium-render` for
/// deterministic, dependency-free rendering (no system Ghostscript/poppler).
pub fn rasterize(bytes: &[u8], config: &OcrPipelineConfig) -> Result<Vec<Page>, OcrError> {
    let pdfium = pdfium_render::prelude::Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| OcrError::Rasterize(e.to_string()))?;

    let base_width = ((config.dpi as f32 / 72.0) * 612.0) as i32;
    let render_config = pdfium_render::prelude::PdfRenderConfig::new()
        .set_target_width(base_width)
        .set_maximum_width((base_width as f32 * config.max_upscale_factor) as i32);

    let mut pages = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| OcrError::Rasterize(e.to_string()))?;
        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        let image = bitmap.as_image().resize(width, height, FilterType::Lanczos3);

        let mut png_bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| OcrError::Rasterize(e.to_string()))?;

        pages.push(Page::empty((index + 1) as u32, width, height, png_bytes));
    }

    Ok(pages)
}

async fn call_model(
    client: &VisionClient,
    prompt: &str,
    image: &[u8],
    limiter: &RateLimiter,
    rpm_limit: u32,
    tpm_limit: u32,
) -> Result<VisionResponse, OcrError> {
    let estimate = VisionClient::estimate_tokens(prompt);
    let permit = limiter.acquire(client.model_name(), estimate, rpm_limit, tpm_limit).await?;
    match client.call(prompt, image).await {
        Ok(resp) => {
            limiter.release(permit, resp.tokens_used, estimate).await?;
            Ok(resp)
        }
        Err(e) => {
            limiter.release(permit, estimate, estimate).await?;
            Err(e.into())
        }
    }
}

/// Confidence assigned to an accepted line count when the two models agree
/// within tolerance (spec §4.9 step 3).
const CONSENSUS_CONFIDENCE: f32 = 1.0;
/// Reduced confidence when the two counts disagree by more than 1 and the
/// pipeline falls back to the larger of the two (spec §4.9 step 3).
const DISAGREEMENT_CONFIDENCE: f32 = 0.5;

/// Stage 3: queries two independent vision models for a line count and
/// reconciles them (spec §4.9 step 3): counts within 1 of each other accept
/// the larger at full confidence; counts that disagree by more than 1 are
/// both recorded in the log and the larger is accepted at reduced
/// confidence; an excessive consensus fails the page outright.
pub async fn count_lines(
    page: &mut Page,
    primary: &VisionClient,
    secondary: &VisionClient,
    limiter: &RateLimiter,
    rpm_limit: u32,
    tpm_limit: u32,
    max_lines_per_page: u32,
) -> Result<(), OcrError> {
    const COUNT_PROMPT: &str =
        "Count the number of tabular inscription lines on this page. Respond with only the integer count.";

    let a = call_model(primary, COUNT_PROMPT, &page.image_bytes, limiter, rpm_limit, tpm_limit).await?;
    let b = call_model(secondary, COUNT_PROMPT, &page.image_bytes, limiter, rpm_limit, tpm_limit).await?;

    let count_a: u32 = a.text.trim().parse().unwrap_or(0);
    let count_b: u32 = b.text.trim().parse().unwrap_or(0);
    let accepted = count_a.max(count_b);
    let delta = count_a.abs_diff(count_b);

    let confidence = if delta > 1 {
        tracing::warn!(
            page = page.page_number,
            primary_count = count_a,
            secondary_count = count_b,
            accepted,
            "line-count models disagreed, accepting the larger count at reduced confidence"
        );
        DISAGREEMENT_CONFIDENCE
    } else {
        CONSENSUS_CONFIDENCE
    };

    if accepted > max_lines_per_page {
        page.failed = true;
        return Err(OcrError::UnreasonableLineCount { page: page.page_number, count: accepted });
    }

    page.line_count = Some(accepted);
    page.line_count_confidence = confidence;
    Ok(())
}

/// Stage 4: requests extractions in non-overlapping windows of
/// `window_size` lines (spec §4.9 step 4). A page-level failure leaves
/// `lines` empty rather than failing the document (spec §4.9 "Failure
/// semantics").
pub async fn extract_windowed(
    page: &mut Page,
    client: &VisionClient,
    limiter: &RateLimiter,
    rpm_limit: u32,
    tpm_limit: u32,
    window_size: u32,
) {
    let Some(total_lines) = page.line_count else {
        page.failed = true;
        return;
    };

    let mut lines = Vec::new();
    let mut start = 1;
    while start <= total_lines {
        let end = (start + window_size - 1).min(total_lines);
        let prompt = format!(
            "Extract inscription lines {start}-{end} from this land registry index page, one per \
             line as raw text with Date/Numero de publication/Nature/Parties/Roles/Remarques/Numero \
             de radiation fields."
        );

        match call_model(client, &prompt, &page.image_bytes, limiter, rpm_limit, tpm_limit).await {
            Ok(response) => lines.extend(parse_window_response(&response.text, start)),
            Err(e) => {
                tracing::warn!(page = page.page_number, start, end, error = %e, "windowed extraction failed");
            }
        }

        start = end + 1;
    }

    if lines.is_empty() {
        page.failed = true;
    }
    page.lines = lines;
}

/// Parses one window's raw model text into lines. Each non-blank line of
/// the response becomes one [`ExtractedLine`]; structured-field resolution
/// happens later in the sanitizer (spec §4.10), so `structured` is left
/// unset here — only `raw_text` is authoritative at this stage.
fn parse_window_response(text: &str, window_start: u32) -> Vec<ExtractedLine> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .enumerate()
        .map(|(offset, block)| {
            let index = window_start + offset as u32;
            let trimmed = block.trim();
            // Normalize to a `Ligne K:` header so the concatenated blob
            // the sanitizer later parses (spec §4.10) always has a
            // recognizable boundary, regardless of what the model echoed.
            let raw_text = if trimmed.starts_with("Ligne ") {
                trimmed.to_string()
            } else {
                format!("Ligne {index}:\n{trimmed}")
            };
            ExtractedLine {
                index,
                raw_text,
                structured: None,
                confidence: 0.8,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherenceVerdict {
    Complete,
    Incomplete,
    OverExtracted,
    Uncertain,
}

/// Stage 5 (spec §4.9 step 5): checks the first/last three extracted lines
/// against the page image.
pub async fn check_coherence(
    page: &Page,
    client: &VisionClient,
    limiter: &RateLimiter,
    rpm_limit: u32,
    tpm_limit: u32,
) -> Result<CoherenceVerdict, OcrError> {
    let sample: Vec<&str> = page
        .lines
        .iter()
        .take(3)
        .chain(page.lines.iter().rev().take(3))
        .map(|l| l.raw_text.as_str())
        .collect();

    let excerpt = sample.join("\n");
    let prompt = format!(
        "Given this page image and these extracted lines:\n{excerpt}\n\
         Respond with exactly one of: complete, incomplete, over-extracted, uncertain."
    );

    let response = call_model(client, &prompt, &page.image_bytes, limiter, rpm_limit, tpm_limit).await?;
    Ok(match response.text.trim().to_lowercase().as_str() {
        "incomplete" => CoherenceVerdict::Incomplete,
        "over-extracted" | "overextracted" => CoherenceVerdict::OverExtracted,
        "complete" => CoherenceVerdict::Complete,
        _ => CoherenceVerdict::Uncertain,
    })
}

/// Stage 6 (spec §4.9 step 6): normalizes party names, dates, and
/// publication numbers in place. Raw pre-boost text is retained on the
/// caller's side (the job row's `raw_ocr_content`) for audit, as required.
pub async fn boost(
    page: &mut Page,
    client: &VisionClient,
    limiter: &RateLimiter,
    rpm_limit: u32,
    tpm_limit: u32,
) -> Result<(), OcrError> {
    let raw_blob = page.lines.iter().map(|l| l.raw_text.as_str()).collect::<Vec<_>>().join("\n\n");
    let prompt = format!("Normalize party names, dates, and publication numbers in this extraction:\n{raw_blob}");

    let response = call_model(client, &prompt, &page.image_bytes, limiter, rpm_limit, tpm_limit).await?;
    let boosted_lines = parse_window_response(&response.text, 1);
    if !boosted_lines.is_empty() {
        page.lines = boosted_lines;
    }
    Ok(())
}

/// Renders a document's pages into one blob delimited by `--- Page N ---`
/// markers for §4.11's sanitizer, then runs it.
pub fn sanitize_document(document: &OcrDocument) -> SanitizedDocument {
    let blob = document
        .pages
        .iter()
        .map(|page| {
            let body = page.lines.iter().map(|l| l.raw_text.as_str()).collect::<Vec<_>>().join("\n\n");
            format!("--- Page {} ---\n{body}\n", page.page_number)
        })
        .collect::<Vec<_>>()
        .join("\n");

    sanitize(&blob)
}
