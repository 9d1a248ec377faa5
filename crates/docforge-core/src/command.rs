//! One-shot command dispatch
//!
//! A transport decodes its request into a [`PdfCommand`] once and hands it
//! to [`execute`]. Every field is already typed; nothing here re-parses strings.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compress::{compress_pdf, CompressionQuality};
use crate::document::PdfDocument;
use crate::embed::{embed_invoice_xml, EmbedOptions};
use crate::error::{DocforgeError, ErrorKind, Result};
use crate::extract::{extract_attachments, extract_metadata, extract_text, PageFilter};
use crate::merge::merge_documents;
use crate::overlay::{watermark_pdf, WatermarkOptions};
use crate::split::{split_document, SplitMode};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PdfCommand {
    Merge {
        files: Vec<Vec<u8>>,
    },
    Split {
        file: Vec<u8>,
        #[serde(default)]
        mode: SplitMode,
    },
    Watermark {
        file: Vec<u8>,
        options: WatermarkOptions,
    },
    Compress {
        file: Vec<u8>,
        #[serde(default)]
        quality: CompressionQuality,
    },
    Embed {
        file: Vec<u8>,
        xml: Vec<u8>,
        #[serde(default)]
        options: EmbedOptions,
    },
    ExtractText {
        file: Vec<u8>,
        #[serde(default)]
        filter: PageFilter,
    },
    ExtractMetadata {
        file: Vec<u8>,
    },
    ExtractAttachments {
        file: Vec<u8>,
    },
}

impl PdfCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PdfCommand::Merge { .. } => "merge",
            PdfCommand::Split { .. } => "split",
            PdfCommand::Watermark { .. } => "watermark",
            PdfCommand::Compress { .. } => "compress",
            PdfCommand::Embed { .. } => "embed",
            PdfCommand::ExtractText { .. } => "extract-text",
            PdfCommand::ExtractMetadata { .. } => "extract-metadata",
            PdfCommand::ExtractAttachments { .. } => "extract-attachments",
        }
    }

    fn input_size(&self) -> usize {
        match self {
            PdfCommand::Merge { files } => files.iter().map(Vec::len).sum(),
            PdfCommand::Embed { file, xml, .. } => file.len() + xml.len(),
            PdfCommand::Split { file, .. }
            | PdfCommand::Watermark { file, .. }
            | PdfCommand::Compress { file, .. }
            | PdfCommand::ExtractText { file, .. }
            | PdfCommand::ExtractMetadata { file }
            | PdfCommand::ExtractAttachments { file } => file.len(),
        }
    }
}

/// A file produced by a command
#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub name: String,
    pub size: usize,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl OutputFile {
    fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: data.len(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub files: Vec<OutputFile>,
    /// Operation-specific JSON report
    pub report: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub metrics: Option<ProcessMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

struct Completed {
    files: Vec<OutputFile>,
    report: Option<serde_json::Value>,
    page_count: u32,
}

/// Run one command. Failures are reported in the result, never panicked.
pub fn execute(command: PdfCommand) -> ProcessResult {
    let start = Instant::now();
    let name = command.name();
    let input_size = command.input_size();

    match run(command) {
        Ok(done) => {
            let output_size = done.files.iter().map(|f| f.size).sum();
            let elapsed = start.elapsed().as_millis() as u64;
            debug!("{} finished in {} ms", name, elapsed);
            ProcessResult {
                success: true,
                files: done.files,
                report: done.report,
                error: None,
                error_kind: None,
                metrics: Some(ProcessMetrics {
                    input_size_bytes: input_size,
                    output_size_bytes: output_size,
                    page_count: done.page_count,
                    processing_time_ms: elapsed,
                }),
            }
        }
        Err(e) => {
            warn!("{} failed: {}", name, e);
            ProcessResult {
                success: false,
                files: Vec::new(),
                report: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
                metrics: None,
            }
        }
    }
}

fn run(command: PdfCommand) -> Result<Completed> {
    match command {
        PdfCommand::Merge { files } => {
            let merged = merge_documents(&files)?;
            single_document("merged.pdf", merged)
        }
        PdfCommand::Split { file, mode } => {
            let output = split_document(&file, &mode)?;
            let report = to_report(&output)?;
            Ok(Completed {
                page_count: output.total_pages,
                files: output
                    .parts
                    .into_iter()
                    .map(|part| OutputFile::new(part.name, part.data))
                    .collect(),
                report: Some(report),
            })
        }
        PdfCommand::Watermark { file, options } => {
            let watermarked = watermark_pdf(&file, &options)?;
            single_document("watermarked.pdf", watermarked)
        }
        PdfCommand::Compress { file, quality } => {
            let output = compress_pdf(&file, quality)?;
            let mut done = single_document("compressed.pdf", output.data)?;
            done.report = Some(to_report(&output.report)?);
            Ok(done)
        }
        PdfCommand::Embed { file, xml, options } => {
            let embedded = embed_invoice_xml(&file, &xml, &options)?;
            single_document("invoice.pdf", embedded)
        }
        PdfCommand::ExtractText { file, filter } => {
            let result = extract_text(&file, &filter)?;
            Ok(Completed {
                page_count: result.page_count,
                report: Some(to_report(&result)?),
                files: Vec::new(),
            })
        }
        PdfCommand::ExtractMetadata { file } => {
            let report = extract_metadata(&file)?;
            Ok(Completed {
                page_count: report.page_count,
                report: Some(to_report(&report)?),
                files: Vec::new(),
            })
        }
        PdfCommand::ExtractAttachments { file } => {
            let page_count = PdfDocument::parse(&file)?.page_count();
            let files: Vec<OutputFile> = extract_attachments(&file)?
                .into_iter()
                .map(|a| OutputFile::new(a.name, a.payload))
                .collect();
            Ok(Completed {
                report: Some(to_report(&files)?),
                files,
                page_count,
            })
        }
    }
}

fn single_document(name: &str, data: Vec<u8>) -> Result<Completed> {
    let page_count = PdfDocument::parse(&data)?.page_count();
    Ok(Completed {
        files: vec![OutputFile::new(name, data)],
        report: None,
        page_count,
    })
}

fn to_report<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| DocforgeError::OperationError(format!("Failed to encode report: {}", e)))
}
