//! PDF document processing
//!
//! This crate parses PDFs into an in-memory model with `lopdf` and applies
//! one transform per call:
//! - `merge_documents` / `split_document`: page-list concatenation and partition
//! - `watermark_pdf`: text overlay above every page
//! - `compress_pdf`: stream re-encoding at a quality level
//! - `embed_invoice_xml`: Factur-X / ZUGFeRD XML attachment plus metadata
//! - `extract_text` / `extract_metadata` / `extract_attachments`
//!
//! Every operation takes byte buffers and returns byte buffers or reports.
//! Nothing is shared between calls, so calls may run on any thread.

pub mod attachment;
pub mod command;
pub mod compress;
pub mod document;
pub mod embed;
pub mod error;
pub mod extract;
pub mod merge;
pub mod metadata;
pub mod overlay;
pub mod split;

#[cfg(test)]
mod test_support;

pub use attachment::Attachment;
pub use command::{execute, OutputFile, PdfCommand, ProcessMetrics, ProcessResult};
pub use compress::{
    compress_pdf, compression_ratio, CompressOutput, CompressionQuality, CompressionReport,
};
pub use document::{MediaBox, Page, PdfDocument, Rotation};
pub use embed::{
    embed_invoice_xml, render_and_embed, ComplianceFlavor, ComplianceMetadata, EmbedOptions,
    FacturXLevel, MarkupRenderer, FACTURX_FILENAME,
};
pub use error::{DocforgeError, ErrorKind, Result};
pub use extract::{
    extract_attachments, extract_metadata, extract_text, ExtractionResult, MetadataReport,
    PageFilter, PageGeometry,
};
pub use merge::merge_documents;
pub use metadata::Metadata;
pub use overlay::{
    watermark_pdf, RawWatermarkParams, WatermarkColor, WatermarkOptions, WatermarkPosition,
};
pub use split::{split_document, SplitMode, SplitModeKind, SplitOutput, SplitPart};

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<u32> {
    Ok(PdfDocument::parse(bytes)?.page_count())
}

/// Parse a range string like "1-3, 5, 8-10" into inclusive `(start, end)` pairs.
///
/// Pairs are returned as written, in input order; a single number `n`
/// becomes `(n, n)`. Whether a pair fits a document is decided by the
/// operation that uses it.
pub fn parse_range_list(input: &str) -> Result<Vec<(u32, u32)>> {
    let mut ranges = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().map_err(|_| {
                DocforgeError::InvalidParameter(format!("Invalid range start: {}", start.trim()))
            })?;
            let end: u32 = end.trim().parse().map_err(|_| {
                DocforgeError::InvalidParameter(format!("Invalid range end: {}", end.trim()))
            })?;
            ranges.push((start, end));
        } else {
            let page: u32 = part
                .parse()
                .map_err(|_| DocforgeError::InvalidParameter(format!("Invalid page: {}", part)))?;
            ranges.push((page, page));
        }
    }

    Ok(ranges)
}
