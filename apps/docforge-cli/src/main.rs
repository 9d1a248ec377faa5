//! docforge command-line front end
//!
//! Reads input files, converts arguments into typed options once, runs a
//! single core command and writes its output files. The JSON result goes
//! to stdout; logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use docforge_core::{execute, PdfCommand, ProcessResult};
use tracing::{debug, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

use cli::{Cli, Command};

/// Where a command's output files go
enum Destination {
    /// Exactly one file at this path
    File(PathBuf),
    /// Each file under its own name in this directory
    Directory(PathBuf),
    /// Report only
    None,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (command, destination) = build_command(args.command)?;
    info!("Running {}", command.name());

    let result = execute(command);
    if result.success {
        write_outputs(&result, &destination)?;
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!(
            "{}",
            result.error.as_deref().unwrap_or("operation failed")
        );
    }
    Ok(())
}

fn build_command(command: Command) -> anyhow::Result<(PdfCommand, Destination)> {
    let built = match command {
        Command::Merge { inputs, output } => {
            let files = inputs.iter().map(|path| read(path)).collect::<anyhow::Result<_>>()?;
            (PdfCommand::Merge { files }, Destination::File(output))
        }
        Command::Split(args) => {
            let mode = args.split_mode()?;
            (
                PdfCommand::Split {
                    file: read(&args.input)?,
                    mode,
                },
                Destination::Directory(args.output_dir),
            )
        }
        Command::Watermark(args) => {
            let options = args.options()?;
            (
                PdfCommand::Watermark {
                    file: read(&args.input)?,
                    options,
                },
                Destination::File(args.output),
            )
        }
        Command::Compress {
            input,
            quality,
            output,
        } => (
            PdfCommand::Compress {
                file: read(&input)?,
                quality: cli::compression_quality(&quality)?,
            },
            Destination::File(output),
        ),
        Command::Embed(args) => {
            let options = args.options()?;
            (
                PdfCommand::Embed {
                    file: read(&args.input)?,
                    xml: read(&args.xml)?,
                    options,
                },
                Destination::File(args.output),
            )
        }
        Command::ExtractText { input, pages } => (
            PdfCommand::ExtractText {
                file: read(&input)?,
                filter: cli::page_filter(&pages)?,
            },
            Destination::None,
        ),
        Command::ExtractMetadata { input } => (
            PdfCommand::ExtractMetadata { file: read(&input)? },
            Destination::None,
        ),
        Command::ExtractAttachments { input, output_dir } => (
            PdfCommand::ExtractAttachments { file: read(&input)? },
            Destination::Directory(output_dir),
        ),
    };
    Ok(built)
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_outputs(result: &ProcessResult, destination: &Destination) -> anyhow::Result<()> {
    match destination {
        Destination::None => {}
        Destination::File(path) => {
            for file in &result.files {
                fs::write(path, &file.data)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                debug!("Wrote {} ({} bytes)", path.display(), file.size);
            }
        }
        Destination::Directory(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            for file in &result.files {
                // Attachment names come from the document; keep only the final component
                let name = Path::new(&file.name)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("attachment.bin"));
                let path = dir.join(name);
                fs::write(&path, &file.data)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                debug!("Wrote {} ({} bytes)", path.display(), file.size);
            }
        }
    }
    Ok(())
}
