//! Text watermark overlay
//!
//! Draws a page-sized text overlay and appends it to every page's content
//! stream. The original content is wrapped in `q ... Q` so its graphics
//! state cannot leak into the overlay, and the overlay is painted last
//! through an ExtGState with the requested fill alpha so the page stays
//! visible underneath.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{resolve, MediaBox, PdfDocument};
use crate::error::{DocforgeError, Result};

pub const DEFAULT_FONT_SIZE: u32 = 60;
pub const DEFAULT_OPACITY: f32 = 0.3;

const FONT_RESOURCE_PREFIX: &str = "DfWmFont";
const STATE_RESOURCE_PREFIX: &str = "DfWmState";

/// Helvetica advance widths for 0x20..=0x7E, in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' ' to '/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // digits
    278, 278, 584, 584, 584, 556, 1015, // ':' to '@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A' to 'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N' to 'Z'
    278, 278, 278, 469, 556, 333, // '[' to '`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a' to 'm'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n' to 'z'
    334, 260, 334, 584, // '{' to '~'
];

/// Width used for Latin-1 characters outside the table
const FALLBACK_WIDTH: u16 = 556;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkColor {
    #[default]
    Gray,
    Red,
    Blue,
    Black,
}

impl WatermarkColor {
    /// Parse a color name. Unknown names fall back to gray.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "red" => WatermarkColor::Red,
            "blue" => WatermarkColor::Blue,
            "black" => WatermarkColor::Black,
            _ => WatermarkColor::Gray,
        }
    }

    pub fn rgb(self) -> (f32, f32, f32) {
        match self {
            WatermarkColor::Gray => (0.5, 0.5, 0.5),
            WatermarkColor::Red => (1.0, 0.0, 0.0),
            WatermarkColor::Blue => (0.0, 0.0, 1.0),
            WatermarkColor::Black => (0.0, 0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkPosition {
    Center,
    #[default]
    Diagonal,
}

impl WatermarkPosition {
    /// Parse a position name. Unknown names fall back to diagonal.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "center" | "centre" => WatermarkPosition::Center,
            _ => WatermarkPosition::Diagonal,
        }
    }
}

/// Watermark settings, identical for every page of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkOptions {
    pub text: String,
    /// Fill alpha; clamped into [0, 1]
    pub opacity: f32,
    /// Font size in points; must be positive
    pub font_size: u32,
    pub color: WatermarkColor,
    pub position: WatermarkPosition,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            opacity: DEFAULT_OPACITY,
            font_size: DEFAULT_FONT_SIZE,
            color: WatermarkColor::default(),
            position: WatermarkPosition::default(),
        }
    }
}

impl WatermarkOptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Untyped watermark parameters as they arrive from a transport
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWatermarkParams {
    pub text: String,
    pub opacity: Option<String>,
    pub font_size: Option<String>,
    pub color: Option<String>,
    pub position: Option<String>,
}

impl TryFrom<RawWatermarkParams> for WatermarkOptions {
    type Error = DocforgeError;

    fn try_from(raw: RawWatermarkParams) -> Result<Self> {
        let opacity = match raw.opacity.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_OPACITY,
            Some(value) => value.parse::<f32>().map_err(|_| {
                DocforgeError::InvalidParameter(format!("opacity '{}' is not a number", value))
            })?,
        };

        let font_size = match raw.font_size.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_FONT_SIZE,
            Some(value) => parse_font_size(value)?,
        };

        Ok(WatermarkOptions {
            text: raw.text,
            opacity,
            font_size,
            color: raw
                .color
                .as_deref()
                .map(WatermarkColor::from_name)
                .unwrap_or_default(),
            position: raw
                .position
                .as_deref()
                .map(WatermarkPosition::from_name)
                .unwrap_or_default(),
        })
    }
}

/// Accepts integers and integral decimals ("48", "48.0")
fn parse_font_size(value: &str) -> Result<u32> {
    if let Ok(size) = value.parse::<u32>() {
        return Ok(size);
    }
    match value.parse::<f64>() {
        Ok(size) if size.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&size) => {
            Ok(size as u32)
        }
        _ => Err(DocforgeError::InvalidParameter(format!(
            "font size '{}' is not a positive integer",
            value
        ))),
    }
}

/// Watermark every page of a serialized PDF
pub fn watermark_pdf(bytes: &[u8], options: &WatermarkOptions) -> Result<Vec<u8>> {
    let mut doc = PdfDocument::parse(bytes)?;
    apply_watermark(&mut doc, options)?;
    doc.serialize()
}

/// Watermark every page of `doc` in place
pub fn apply_watermark(doc: &mut PdfDocument, options: &WatermarkOptions) -> Result<()> {
    if options.text.is_empty() {
        return Err(DocforgeError::InvalidInput("watermark text is required".into()));
    }
    if options.font_size == 0 {
        return Err(DocforgeError::InvalidParameter(
            "font size must be positive".into(),
        ));
    }
    if options.opacity.is_nan() {
        return Err(DocforgeError::InvalidParameter("opacity is not a number".into()));
    }
    let opacity = options.opacity.clamp(0.0, 1.0);
    let encoded = encode_latin1(&options.text);

    let pages = doc.pages();
    let inner = doc.inner_mut();

    let font_id = inner.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let state_id = inner.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(opacity),
        "CA" => Object::Real(opacity),
    });
    let save_id = inner.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

    for page in &pages {
        let (font_name, state_name) = install_resources(inner, page.id, font_id, state_id)?;
        let overlay = overlay_content(
            &page.media_box,
            &encoded,
            options,
            opacity,
            &font_name,
            &state_name,
        )?;
        let overlay_id = inner.add_object(Stream::new(Dictionary::new(), overlay));
        wrap_page_contents(inner, page.id, save_id, overlay_id)?;
        debug!("Watermarked page {}", page.number);
    }

    info!(
        "Applied watermark '{}' to {} pages ({:?}, {:?})",
        options.text,
        pages.len(),
        options.position,
        options.color
    );
    Ok(())
}

/// Build the overlay operator sequence for one page
fn overlay_content(
    media_box: &MediaBox,
    text: &[u8],
    options: &WatermarkOptions,
    opacity: f32,
    font_name: &str,
    state_name: &str,
) -> Result<Vec<u8>> {
    let size = options.font_size as f32;
    let half_width = text_width(text, size) / 2.0;
    let (cx, cy) = media_box.center();
    let (r, g, b) = options.color.rgb();

    // Closes the `q` placed before the original content
    let mut operations = vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(state_name.as_bytes().to_vec())]),
        Operation::new("rg", vec![r.into(), g.into(), b.into()]),
    ];

    let origin = match options.position {
        WatermarkPosition::Diagonal => {
            let (sin, cos) = 45f32.to_radians().sin_cos();
            operations.push(Operation::new(
                "cm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), cx.into(), cy.into()],
            ));
            operations.push(Operation::new(
                "cm",
                vec![cos.into(), sin.into(), (-sin).into(), cos.into(), 0.into(), 0.into()],
            ));
            (-half_width, 0.0)
        }
        WatermarkPosition::Center => (cx - half_width, cy),
    };

    operations.extend([
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(font_name.as_bytes().to_vec()), size.into()],
        ),
        Operation::new("Td", vec![origin.0.into(), origin.1.into()]),
        Operation::new(
            "Tj",
            vec![Object::String(text.to_vec(), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]);

    debug!("Overlay opacity {} at center ({}, {})", opacity, cx, cy);
    Content { operations }
        .encode()
        .map_err(|e| DocforgeError::OperationError(format!("Failed to encode overlay: {}", e)))
}

/// Give the page its own resource dictionary containing the overlay font
/// and graphics state, under names that do not clash with existing ones.
fn install_resources(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
    state_id: ObjectId,
) -> Result<(String, String)> {
    let mut resources = inherited_resources(doc, page_id);

    let mut fonts = sub_dictionary(doc, &resources, b"Font");
    let font_name = unique_name(&fonts, FONT_RESOURCE_PREFIX);
    fonts.set(font_name.as_bytes().to_vec(), Object::Reference(font_id));

    let mut states = sub_dictionary(doc, &resources, b"ExtGState");
    let state_name = unique_name(&states, STATE_RESOURCE_PREFIX);
    states.set(state_name.as_bytes().to_vec(), Object::Reference(state_id));

    resources.set("Font", fonts);
    resources.set("ExtGState", states);

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| DocforgeError::OperationError(format!("Page {:?}: {}", page_id, e)))?;
    page.set("Resources", resources);

    Ok((font_name, state_name))
}

fn inherited_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = page_id;
    for _ in 0..32 {
        let Ok(dict) = doc.get_dictionary(current) else {
            break;
        };
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve(doc, resources).as_dict().cloned().unwrap_or_default();
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }
    Dictionary::new()
}

fn sub_dictionary(doc: &Document, resources: &Dictionary, key: &[u8]) -> Dictionary {
    resources
        .get(key)
        .map(|obj| resolve(doc, obj))
        .and_then(Object::as_dict)
        .cloned()
        .unwrap_or_default()
}

fn unique_name(dict: &Dictionary, prefix: &str) -> String {
    if !dict.has(prefix.as_bytes()) {
        return prefix.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|name| !dict.has(name.as_bytes()))
        .unwrap_or_else(|| prefix.to_string())
}

/// Contents becomes `[q, original..., overlay]`; the overlay opens with `Q`
fn wrap_page_contents(
    doc: &mut Document,
    page_id: ObjectId,
    save_id: ObjectId,
    overlay_id: ObjectId,
) -> Result<()> {
    let mut contents = vec![Object::Reference(save_id)];
    contents.extend(content_streams(doc, page_id));
    contents.push(Object::Reference(overlay_id));

    doc.get_dictionary_mut(page_id)
        .map_err(|e| DocforgeError::OperationError(format!("Page {:?}: {}", page_id, e)))?
        .set("Contents", contents);
    Ok(())
}

/// The page's content stream references, with an indirect array flattened
fn content_streams(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(contents) = doc.get_dictionary(page_id).and_then(|page| page.get(b"Contents")) else {
        return Vec::new();
    };
    match contents {
        Object::Array(items) => items.clone(),
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![contents.clone()],
            Err(_) => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn encode_latin1(text: &str) -> Vec<u8> {
    let mut replaced = 0usize;
    let bytes = text
        .chars()
        .map(|c| match u8::try_from(u32::from(c)) {
            Ok(b) => b,
            Err(_) => {
                replaced += 1;
                b'?'
            }
        })
        .collect();
    if replaced > 0 {
        warn!(
            "Replaced {} characters outside Latin-1 in watermark text",
            replaced
        );
    }
    bytes
}

/// Rendered width of Latin-1 `text` in Helvetica at `size` points
pub fn text_width(text: &[u8], size: f32) -> f32 {
    let units: u32 = text
        .iter()
        .map(|&b| match b {
            0x20..=0x7E => HELVETICA_WIDTHS[(b - 0x20) as usize] as u32,
            _ => FALLBACK_WIDTH as u32,
        })
        .sum();
    units as f32 * size / 1000.0
}
