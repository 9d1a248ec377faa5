//! Stream re-encoding
//!
//! Decodes every Flate or unfiltered stream and re-encodes it with zlib at
//! a level picked by [`CompressionQuality`]. Streams using image codecs
//! (DCT, JPX, JBIG2, CCITT) or predictor parameters are left as they are.
//! The two more aggressive levels also fold byte-identical streams into one
//! object and drop anything unreachable from the trailer.

use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::PdfDocument;
use crate::error::{DocforgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionQuality {
    /// Smallest output
    Low,
    #[default]
    Medium,
    /// Fastest, least size reduction
    High,
}

impl CompressionQuality {
    pub fn zlib_level(self) -> u32 {
        match self {
            CompressionQuality::Low => 9,
            CompressionQuality::Medium => 6,
            CompressionQuality::High => 1,
        }
    }

    fn deduplicates(self) -> bool {
        !matches!(self, CompressionQuality::High)
    }
}

impl FromStr for CompressionQuality {
    type Err = DocforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(CompressionQuality::Low),
            "medium" => Ok(CompressionQuality::Medium),
            "high" => Ok(CompressionQuality::High),
            other => Err(DocforgeError::InvalidParameter(format!(
                "Unknown compression quality '{}' (expected low, medium or high)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionReport {
    pub original_size: usize,
    pub compressed_size: usize,
    /// Percentage reduction, two decimals
    pub compression_ratio: f64,
    pub streams_recompressed: usize,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone)]
pub struct CompressOutput {
    pub data: Vec<u8>,
    pub report: CompressionReport,
}

/// Percentage size reduction rounded to two decimals; 0 for an empty original
pub fn compression_ratio(original_size: usize, compressed_size: usize) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let reduction = (original_size as f64 - compressed_size as f64) / original_size as f64 * 100.0;
    (reduction * 100.0).round() / 100.0
}

/// Re-encode the streams of a serialized PDF
pub fn compress_pdf(bytes: &[u8], quality: CompressionQuality) -> Result<CompressOutput> {
    let mut doc = PdfDocument::parse(bytes)?;

    let streams_recompressed = recompress_streams(doc.inner_mut(), quality.zlib_level())?;

    let duplicates_removed = if quality.deduplicates() {
        let removed = deduplicate_streams(doc.inner_mut());
        doc.inner_mut().prune_objects();
        removed
    } else {
        0
    };

    let data = doc.serialize()?;

    let report = CompressionReport {
        original_size: bytes.len(),
        compressed_size: data.len(),
        compression_ratio: compression_ratio(bytes.len(), data.len()),
        streams_recompressed,
        duplicates_removed,
    };
    info!(
        "Compressed {} -> {} bytes ({}%, {:?})",
        report.original_size, report.compressed_size, report.compression_ratio, quality
    );

    Ok(CompressOutput { data, report })
}

/// Re-encode eligible streams, keeping the new encoding only when it is smaller
fn recompress_streams(doc: &mut Document, level: u32) -> Result<usize> {
    let mut recompressed = 0;

    for (id, object) in doc.objects.iter_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        let Some(plain) = decoded_content(stream) else {
            continue;
        };

        let encoded = zlib(&plain, level)
            .map_err(|e| DocforgeError::OperationError(format!("zlib encode failed: {}", e)))?;
        if encoded.len() < stream.content.len() {
            debug!(
                "Stream {:?}: {} -> {} bytes",
                id,
                stream.content.len(),
                encoded.len()
            );
            stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
            stream.set_content(encoded);
            recompressed += 1;
        }
    }

    Ok(recompressed)
}

/// Decoded bytes of a stream we know how to re-encode, `None` otherwise
fn decoded_content(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.has(b"DecodeParms") {
        return None;
    }
    if let Ok(kind) = stream.dict.get(b"Type").and_then(Object::as_name) {
        // XMP packets stay readable for PDF/A validators
        if kind == b"XRef" || kind == b"ObjStm" || kind == b"Metadata" {
            return None;
        }
    }

    let filters: Vec<&[u8]> = match stream.dict.get(b"Filter") {
        Err(_) => Vec::new(),
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(items)) => items.iter().filter_map(|o| o.as_name().ok()).collect(),
        Ok(_) => return None,
    };

    match filters.as_slice() {
        [] => Some(stream.content.clone()),
        [b"FlateDecode"] => stream.decompressed_content().ok(),
        _ => None,
    }
}

fn zlib(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Fold streams with identical dictionary and content into the first
/// occurrence and point every reference at it. Returns how many were removed.
fn deduplicate_streams(doc: &mut Document) -> usize {
    let mut canonical: HashMap<(String, Vec<u8>), ObjectId> = HashMap::new();
    let mut redirects: HashMap<ObjectId, ObjectId> = HashMap::new();

    for (id, object) in doc.objects.iter() {
        let Object::Stream(stream) = object else {
            continue;
        };
        let key = (format!("{:?}", stream.dict), stream.content.clone());
        match canonical.get(&key) {
            Some(&first) => {
                redirects.insert(*id, first);
            }
            None => {
                canonical.insert(key, *id);
            }
        }
    }

    if redirects.is_empty() {
        return 0;
    }

    for object in doc.objects.values_mut() {
        redirect_refs(object, &redirects);
    }
    for (_, value) in doc.trailer.iter_mut() {
        redirect_refs(value, &redirects);
    }
    for id in redirects.keys() {
        doc.objects.remove(id);
    }

    debug!("Folded {} duplicate streams", redirects.len());
    redirects.len()
}

fn redirect_refs(obj: &mut Object, redirects: &HashMap<ObjectId, ObjectId>) {
    match obj {
        Object::Reference(id) => {
            if let Some(target) = redirects.get(id) {
                *id = *target;
            }
        }
        Object::Array(items) => items.iter_mut().for_each(|o| redirect_refs(o, redirects)),
        Object::Dictionary(dict) => dict.iter_mut().for_each(|(_, o)| redirect_refs(o, redirects)),
        Object::Stream(stream) => stream
            .dict
            .iter_mut()
            .for_each(|(_, o)| redirect_refs(o, redirects)),
        _ => {}
    }
}
