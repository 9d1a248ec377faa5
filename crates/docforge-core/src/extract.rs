//! Text and metadata extraction

use std::collections::BTreeMap;
use std::str::FromStr;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attachment::Attachment;
use crate::document::PdfDocument;
use crate::error::{DocforgeError, Result};
use crate::metadata::{decode_text_string, Metadata};

/// Which pages to extract text from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFilter {
    #[default]
    All,
    Pages(Vec<u32>),
}

impl PageFilter {
    /// Page numbers in `[1, page_count]` selected by this filter, ascending, no duplicates
    pub fn select(&self, page_count: u32) -> Vec<u32> {
        match self {
            PageFilter::All => (1..=page_count).collect(),
            PageFilter::Pages(pages) => {
                let mut selected: Vec<u32> = pages
                    .iter()
                    .copied()
                    .filter(|p| (1..=page_count).contains(p))
                    .collect();
                selected.sort_unstable();
                selected.dedup();
                selected
            }
        }
    }
}

impl FromStr for PageFilter {
    type Err = DocforgeError;

    /// `all` (or an empty string) selects every page; otherwise a comma list of numbers
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageFilter::All);
        }

        s.split(',')
            .map(|token| {
                let token = token.trim();
                token.parse::<u32>().map_err(|_| {
                    DocforgeError::InvalidParameter(format!("Invalid page number '{}'", token))
                })
            })
            .collect::<Result<Vec<u32>>>()
            .map(PageFilter::Pages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub text: String,
    pub pages: BTreeMap<u32, String>,
    pub page_count: u32,
    pub char_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageGeometry {
    pub page: u32,
    pub width: f32,
    pub height: f32,
    pub rotation: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataReport {
    pub metadata: Metadata,
    pub page_count: u32,
    pub pages: Vec<PageGeometry>,
    pub file_size: usize,
    pub encrypted: bool,
}

/// Plain text per page plus the concatenation of all selected pages
pub fn extract_text(bytes: &[u8], filter: &PageFilter) -> Result<ExtractionResult> {
    let doc = PdfDocument::parse(bytes)?;
    let page_count = doc.page_count();
    let page_ids = doc.inner().get_pages();

    let mut pages = BTreeMap::new();
    for number in filter.select(page_count) {
        let text = match page_ids.get(&number) {
            Some(&page_id) => page_text(doc.inner(), number, page_id),
            None => String::new(),
        };
        pages.insert(number, text);
    }

    let text = pages
        .values()
        .map(|t| t.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim_end()
        .to_string();
    let char_count = text.chars().count();

    info!(
        "Extracted {} characters from {} of {} pages",
        char_count,
        pages.len(),
        page_count
    );
    Ok(ExtractionResult {
        text,
        pages,
        page_count,
        char_count,
    })
}

/// Info dictionary, page geometry and container flags
pub fn extract_metadata(bytes: &[u8]) -> Result<MetadataReport> {
    let doc = PdfDocument::parse(bytes)?;

    let pages = doc
        .pages()
        .into_iter()
        .map(|page| PageGeometry {
            page: page.number,
            width: page.media_box.width(),
            height: page.media_box.height(),
            rotation: page.rotation.degrees(),
        })
        .collect();

    Ok(MetadataReport {
        metadata: doc.metadata(),
        page_count: doc.page_count(),
        pages,
        file_size: bytes.len(),
        encrypted: doc.is_encrypted(),
    })
}

/// Every embedded file, in name-tree order
pub fn extract_attachments(bytes: &[u8]) -> Result<Vec<Attachment>> {
    let doc = PdfDocument::parse(bytes)?;
    let attachments = doc.attachments();
    debug!("Found {} attachments", attachments.len());
    Ok(attachments)
}

/// Text of one page. Font-aware extraction first; a raw walk over the
/// text-showing operators when that fails. Never errors.
fn page_text(doc: &Document, number: u32, page_id: ObjectId) -> String {
    match doc.extract_text(&[number]) {
        Ok(text) => return text,
        Err(e) => debug!(
            "Page {}: font-aware extraction failed ({}), scanning operators",
            number, e
        ),
    }

    match doc
        .get_page_content(page_id)
        .map_err(|e| e.to_string())
        .and_then(|content| Content::decode(&content).map_err(|e| e.to_string()))
    {
        Ok(content) => operator_text(&content),
        Err(e) => {
            warn!("Page {}: no extractable text ({})", number, e);
            String::new()
        }
    }
}

fn operator_text(content: &Content) -> String {
    let mut text = String::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "Tj" | "TJ" | "'" | "\"" => {
                for operand in &op.operands {
                    push_operand_text(operand, &mut text);
                }
            }
            "ET" | "T*" | "Td" | "TD" => {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            _ => {}
        }
    }
    text
}

fn push_operand_text(operand: &Object, out: &mut String) {
    match operand {
        Object::String(bytes, _) => out.push_str(&decode_text_string(bytes)),
        Object::Array(items) => {
            for item in items {
                match item {
                    Object::String(bytes, _) => out.push_str(&decode_text_string(bytes)),
                    // Large negative kerning usually separates words
                    Object::Integer(n) if *n < -100 => out.push(' '),
                    Object::Real(n) if *n < -100.0 => out.push(' '),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        build_pdf, build_pdf_with_info, encrypted_pdf, numbered_pdf, ContentsLayout, PageSpec,
    };
    use lopdf::content::Operation;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_all_pages() {
        let result = extract_text(&numbered_pdf(3, "Doc"), &PageFilter::All).unwrap();

        assert_eq!(result.page_count, 3);
        assert_eq!(result.pages.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        for (number, text) in &result.pages {
            assert!(text.contains(&format!("Doc-Page-{}", number)), "page {}: {:?}", number, text);
        }
        assert!(result.text.contains("Doc-Page-1"));
        assert!(result.text.contains("\n\n"));
        assert_eq!(result.text, result.text.trim_end());
        assert_eq!(result.char_count, result.text.chars().count());
    }

    #[test]
    fn test_filter_excludes_out_of_range() {
        let filter = PageFilter::Pages(vec![2, 7, 0, 2]);
        let result = extract_text(&numbered_pdf(3, "Doc"), &filter).unwrap();

        assert_eq!(result.pages.len(), 1);
        assert!(result.pages[&2].contains("Doc-Page-2"));
        assert!(!result.text.contains("Doc-Page-1"));
    }

    #[test]
    fn test_blank_page_yields_empty_text() {
        let pdf = build_pdf(&[PageSpec::text("Cover"), PageSpec::blank()]);
        let result = extract_text(&pdf, &PageFilter::All).unwrap();

        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.pages[&2].trim(), "");
        assert!(result.text.contains("Cover"));
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("all".parse::<PageFilter>().unwrap(), PageFilter::All);
        assert_eq!("".parse::<PageFilter>().unwrap(), PageFilter::All);
        assert_eq!("1, 3".parse::<PageFilter>().unwrap(), PageFilter::Pages(vec![1, 3]));
        assert!(matches!(
            "1,x".parse::<PageFilter>(),
            Err(DocforgeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_metadata_report() {
        let pdf = build_pdf_with_info(
            &[PageSpec::text("A"), PageSpec::text("B").size(842.0, 595.0).rotate(-90)],
            &[("Title", "Quarterly"), ("Author", "Finance")],
        );
        let report = extract_metadata(&pdf).unwrap();

        assert_eq!(report.page_count, 2);
        assert_eq!(report.file_size, pdf.len());
        assert!(!report.encrypted);
        assert_eq!(report.metadata.get("Title"), Some("Quarterly"));
        assert_eq!(report.metadata.get("Subject"), None);
        assert_eq!(
            report.pages[1],
            PageGeometry {
                page: 2,
                width: 842.0,
                height: 595.0,
                rotation: 270
            }
        );
        assert_eq!(report.pages[0].rotation, 0);
    }

    #[test]
    fn test_metadata_reports_encryption() {
        let report = extract_metadata(&encrypted_pdf(&[PageSpec::text("Sealed")])).unwrap();
        assert!(report.encrypted);
        assert_eq!(report.page_count, 1);
    }

    #[test]
    fn test_text_across_content_arrays() {
        let pdf = build_pdf(&[
            PageSpec::text("Direct array").contents(ContentsLayout::Array),
            PageSpec::text("Indirect array").contents(ContentsLayout::IndirectArray),
        ]);
        let result = extract_text(&pdf, &PageFilter::All).unwrap();

        assert!(result.pages[&1].contains("Direct array"));
        assert!(result.pages[&2].contains("Indirect array"));
    }

    #[test]
    fn test_metadata_garbage_fails() {
        let err = extract_metadata(b"plain text").unwrap_err();
        assert!(matches!(err, DocforgeError::MalformedInput { .. }));
    }

    #[test]
    fn test_operator_fallback_handles_tj_arrays() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new(
                    "TJ",
                    vec![Object::Array(vec![
                        Object::string_literal("Hello"),
                        Object::Integer(-250),
                        Object::string_literal("World"),
                    ])],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        assert_eq!(operator_text(&content), "Hello World\n");
    }
}
