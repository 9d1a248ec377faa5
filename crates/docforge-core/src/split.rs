//! PDF Split algorithm
//!
//! Partitions one PDF into sub-documents, either one per page or one per
//! inclusive page range. Selector entries that fall outside the document
//! are skipped; only an unparseable source fails the call.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::PdfDocument;
use crate::error::{DocforgeError, Result};

/// How to partition the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "selector", rename_all = "lowercase")]
pub enum SplitMode {
    /// One single-page output per listed page number. Empty means every page.
    Pages(Vec<u32>),
    /// One output per inclusive `(start, end)` pair
    Ranges(Vec<(u32, u32)>),
}

impl Default for SplitMode {
    fn default() -> Self {
        SplitMode::Pages(Vec::new())
    }
}

/// Mode name without its selector, as a transport receives it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitModeKind {
    Pages,
    Ranges,
}

impl FromStr for SplitModeKind {
    type Err = DocforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pages" => Ok(SplitModeKind::Pages),
            "ranges" => Ok(SplitModeKind::Ranges),
            other => Err(DocforgeError::UnsupportedOperation(format!(
                "Unknown split mode '{}'",
                other
            ))),
        }
    }
}

impl SplitMode {
    /// Combine a mode name with the selector that mode reads
    pub fn from_parts(kind: SplitModeKind, pages: Vec<u32>, ranges: Vec<(u32, u32)>) -> Self {
        match kind {
            SplitModeKind::Pages => SplitMode::Pages(pages),
            SplitModeKind::Ranges => SplitMode::Ranges(ranges),
        }
    }

    pub fn kind(&self) -> SplitModeKind {
        match self {
            SplitMode::Pages(_) => SplitModeKind::Pages,
            SplitMode::Ranges(_) => SplitModeKind::Ranges,
        }
    }
}

/// One output document
#[derive(Debug, Clone, Serialize)]
pub struct SplitPart {
    pub name: String,
    /// Source page numbers, in output order
    pub pages: Vec<u32>,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitOutput {
    pub parts: Vec<SplitPart>,
    pub total_pages: u32,
    pub produced: usize,
}

/// Split a serialized PDF
pub fn split_document(bytes: &[u8], mode: &SplitMode) -> Result<SplitOutput> {
    let doc = PdfDocument::parse(bytes)?;
    let total_pages = doc.page_count();

    let plan = plan_parts(mode, total_pages)?;
    let mut parts = Vec::with_capacity(plan.len());
    for (name, pages) in plan {
        let mut part = extract_pages(&doc, &pages)?;
        let data = part.serialize()?;
        debug!("Wrote {} ({} pages, {} bytes)", name, pages.len(), data.len());
        parts.push(SplitPart { name, pages, data });
    }

    info!(
        "Split {}-page document into {} parts ({:?} mode)",
        total_pages,
        parts.len(),
        mode.kind()
    );
    Ok(SplitOutput {
        produced: parts.len(),
        parts,
        total_pages,
    })
}

/// Resolve the selector into named page lists, dropping entries that do not fit
fn plan_parts(mode: &SplitMode, total_pages: u32) -> Result<Vec<(String, Vec<u32>)>> {
    match mode {
        SplitMode::Pages(selected) => {
            let selected: Vec<u32> = if selected.is_empty() {
                (1..=total_pages).collect()
            } else {
                selected.clone()
            };

            Ok(selected
                .into_iter()
                .filter(|&page| {
                    let in_range = (1..=total_pages).contains(&page);
                    if !in_range {
                        debug!("Skipping page {} (document has {} pages)", page, total_pages);
                    }
                    in_range
                })
                .map(|page| (format!("page_{}.pdf", page), vec![page]))
                .collect())
        }
        SplitMode::Ranges(ranges) => {
            if ranges.is_empty() {
                return Err(DocforgeError::UnsupportedOperation(
                    "Split by ranges requires at least one range".into(),
                ));
            }

            Ok(ranges
                .iter()
                .filter(|&&(start, end)| {
                    let valid = start >= 1 && end <= total_pages && start <= end;
                    if !valid {
                        debug!(
                            "Skipping range {}-{} (document has {} pages)",
                            start, end, total_pages
                        );
                    }
                    valid
                })
                .map(|&(start, end)| {
                    (format!("pages_{}-{}.pdf", start, end), (start..=end).collect())
                })
                .collect())
        }
    }
}

/// Copy `doc` keeping only `keep` (1-indexed, ascending)
fn extract_pages(doc: &PdfDocument, keep: &[u32]) -> Result<PdfDocument> {
    let mut inner = doc.inner().clone();
    let page_count = doc.page_count();

    // Delete in reverse order so the remaining numbers stay valid
    let to_delete: Vec<u32> = (1..=page_count).rev().filter(|p| !keep.contains(p)).collect();
    for page_num in to_delete {
        inner.delete_pages(&[page_num]);
    }

    // Drop objects only the deleted pages used
    inner.prune_objects();
    inner.compress();

    Ok(PdfDocument::from_inner(inner))
}
