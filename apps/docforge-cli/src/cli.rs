//! Argument definitions and their conversion into typed core options

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use docforge_core::{
    parse_range_list, ComplianceFlavor, ComplianceMetadata, CompressionQuality, EmbedOptions,
    FacturXLevel, PageFilter, RawWatermarkParams, Result, SplitMode, SplitModeKind,
    WatermarkOptions,
};

/// Command-line arguments for docforge
#[derive(Parser, Debug)]
#[command(name = "docforge")]
#[command(version, about = "Merge, split, watermark, compress and embed invoices into PDFs")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Concatenate PDFs in the order given
    Merge {
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "merged.pdf")]
        output: PathBuf,
    },
    /// Split a PDF into single pages or page ranges
    Split(SplitArgs),
    /// Stamp a text watermark on every page
    Watermark(WatermarkArgs),
    /// Re-encode content streams
    Compress {
        input: PathBuf,
        /// low, medium or high
        #[arg(short, long, default_value = "medium")]
        quality: String,
        #[arg(short, long, default_value = "compressed.pdf")]
        output: PathBuf,
    },
    /// Attach a Factur-X / ZUGFeRD invoice XML
    Embed(EmbedArgs),
    /// Print per-page text as JSON
    ExtractText {
        input: PathBuf,
        /// "all" or a comma-separated list of page numbers
        #[arg(short, long, default_value = "all")]
        pages: String,
    },
    /// Print metadata and page geometry as JSON
    ExtractMetadata { input: PathBuf },
    /// Write every embedded file into a directory
    ExtractAttachments {
        input: PathBuf,
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    pub input: PathBuf,
    /// pages or ranges
    #[arg(short, long, default_value = "pages")]
    pub mode: String,
    /// Page numbers for pages mode, e.g. "1,3,5"; empty means every page
    #[arg(long, default_value = "")]
    pub pages: String,
    /// Inclusive ranges for ranges mode, e.g. "1-3, 6-8"
    #[arg(long, default_value = "")]
    pub ranges: String,
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct WatermarkArgs {
    pub input: PathBuf,
    #[arg(short, long)]
    pub text: String,
    #[arg(long)]
    pub opacity: Option<String>,
    #[arg(long)]
    pub font_size: Option<String>,
    /// gray, red, blue or black
    #[arg(long)]
    pub color: Option<String>,
    /// center or diagonal
    #[arg(long)]
    pub position: Option<String>,
    #[arg(short, long, default_value = "watermarked.pdf")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct EmbedArgs {
    pub input: PathBuf,
    /// Invoice XML to attach as factur-x.xml
    #[arg(long)]
    pub xml: PathBuf,
    /// factur-x or manual
    #[arg(long, default_value = "factur-x")]
    pub flavor: String,
    #[arg(long, default_value = "extended")]
    pub level: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub author: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub producer: Option<String>,
    #[arg(short, long, default_value = "invoice.pdf")]
    pub output: PathBuf,
}

impl SplitArgs {
    pub fn split_mode(&self) -> Result<SplitMode> {
        let kind: SplitModeKind = self.mode.parse()?;
        let pages = parse_range_list(&self.pages)?
            .into_iter()
            .flat_map(|(start, end)| start..=end)
            .collect();
        let ranges = parse_range_list(&self.ranges)?;
        Ok(SplitMode::from_parts(kind, pages, ranges))
    }
}

impl WatermarkArgs {
    pub fn options(&self) -> Result<WatermarkOptions> {
        WatermarkOptions::try_from(RawWatermarkParams {
            text: self.text.clone(),
            opacity: self.opacity.clone(),
            font_size: self.font_size.clone(),
            color: self.color.clone(),
            position: self.position.clone(),
        })
    }
}

impl EmbedArgs {
    pub fn options(&self) -> Result<EmbedOptions> {
        let flavor = match self.flavor.parse::<ComplianceFlavor>()? {
            ComplianceFlavor::FacturX { .. } => ComplianceFlavor::FacturX {
                level: self.level.parse::<FacturXLevel>()?,
            },
            manual => manual,
        };

        let defaults = ComplianceMetadata::default();
        Ok(EmbedOptions {
            flavor,
            metadata: ComplianceMetadata {
                title: self.title.clone().unwrap_or(defaults.title),
                author: self.author.clone().unwrap_or(defaults.author),
                subject: self.subject.clone(),
                producer: self.producer.clone().unwrap_or(defaults.producer),
            },
        })
    }
}

pub fn compression_quality(value: &str) -> Result<CompressionQuality> {
    value.parse()
}

pub fn page_filter(value: &str) -> Result<PageFilter> {
    value.parse()
}
