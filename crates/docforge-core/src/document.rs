//! In-memory PDF document model
//!
//! `PdfDocument` owns a parsed `lopdf::Document` and exposes the view the
//! operations need: the ordered page list with resolved geometry, the
//! metadata dictionary, embedded-file attachments and the encryption flag.
//! Page order is always the order `lopdf` reports from the page tree.

use chrono::Utc;
use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attachment::{self, Attachment};
use crate::error::{DocforgeError, Result};
use crate::metadata::{self, Metadata};

/// Attributes a page may inherit from its ancestors in the page tree
pub(crate) const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guards against cyclic `/Parent` chains in damaged files
const MAX_TREE_DEPTH: usize = 32;

/// US Letter, used when no MediaBox is found anywhere up the tree
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// A page's physical size in points, kept as the raw `[llx lly urx ury]` rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaBox {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl MediaBox {
    pub fn new(llx: f32, lly: f32, urx: f32, ury: f32) -> Self {
        Self { llx, lly, urx, ury }
    }

    pub fn width(&self) -> f32 {
        (self.urx - self.llx).abs()
    }

    pub fn height(&self) -> f32 {
        (self.ury - self.lly).abs()
    }

    /// Geometric center of the box in default user space
    pub fn center(&self) -> (f32, f32) {
        ((self.llx + self.urx) / 2.0, (self.lly + self.ury) / 2.0)
    }
}

impl Default for MediaBox {
    fn default() -> Self {
        let [llx, lly, urx, ury] = DEFAULT_MEDIA_BOX;
        Self::new(llx, lly, urx, ury)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Normalize a `/Rotate` value. Values that are not multiples of 90 read as 0.
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::R90,
            180 => Rotation::R180,
            270 => Rotation::R270,
            _ => Rotation::R0,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }
}

/// A page view: 1-indexed position, object id and resolved geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub number: u32,
    pub id: ObjectId,
    pub media_box: MediaBox,
    pub rotation: Rotation,
}

/// A parsed PDF
#[derive(Debug, Clone)]
pub struct PdfDocument {
    inner: Document,
}

impl PdfDocument {
    /// Parse a serialized PDF.
    ///
    /// Fails with `MalformedInput` when the buffer is not a PDF container
    /// (no header, broken xref/trailer, truncated objects) or has no page tree.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(DocforgeError::malformed("empty buffer"));
        }

        let inner =
            Document::load_mem(bytes).map_err(|e| DocforgeError::malformed(e.to_string()))?;
        let doc = Self { inner };
        doc.pages_root_id()?;

        debug!(
            "Parsed PDF {} ({} bytes, {} pages)",
            doc.inner.version,
            bytes.len(),
            doc.page_count()
        );
        Ok(doc)
    }

    /// Serialize to bytes, stamping `/ModDate` with the current time
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        let mut info = self.metadata();
        info.set(metadata::MOD_DATE, metadata::pdf_date(Utc::now()));
        metadata::write_info(&mut self.inner, &info);

        let mut buffer = Vec::new();
        self.inner
            .save_to(&mut buffer)
            .map_err(|e| DocforgeError::OperationError(format!("Failed to save PDF: {}", e)))?;
        Ok(buffer)
    }

    pub fn page_count(&self) -> u32 {
        self.inner.get_pages().len() as u32
    }

    /// Pages in document order
    pub fn pages(&self) -> Vec<Page> {
        self.inner
            .get_pages()
            .into_iter()
            .map(|(number, id)| Page {
                number,
                id,
                media_box: self.media_box(id),
                rotation: self.rotation(id),
            })
            .collect()
    }

    pub fn metadata(&self) -> Metadata {
        metadata::read_info(&self.inner)
    }

    pub fn set_metadata(&mut self, metadata: &Metadata) {
        metadata::write_info(&mut self.inner, metadata);
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        attachment::read_attachments(&self.inner)
    }

    /// Add an attachment, replacing any existing one with the same name.
    /// Returns the object id of the new file specification.
    pub fn set_attachment(&mut self, attachment: &Attachment) -> Result<ObjectId> {
        attachment::upsert_attachment(&mut self.inner, attachment, Default::default())
            .map(|upserted| upserted.filespec_id)
    }

    /// Whether the trailer carries an `/Encrypt` entry. Informational only.
    pub fn is_encrypted(&self) -> bool {
        self.inner.trailer.get(b"Encrypt").is_ok()
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub(crate) fn inner(&self) -> &Document {
        &self.inner
    }

    pub(crate) fn inner_mut(&mut self) -> &mut Document {
        &mut self.inner
    }

    pub(crate) fn into_inner(self) -> Document {
        self.inner
    }

    pub(crate) fn from_inner(inner: Document) -> Self {
        Self { inner }
    }

    pub(crate) fn catalog_id(&self) -> Result<ObjectId> {
        self.inner
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| DocforgeError::malformed("missing trailer /Root"))
    }

    pub(crate) fn pages_root_id(&self) -> Result<ObjectId> {
        let catalog_id = self.catalog_id()?;
        self.inner
            .get_dictionary(catalog_id)
            .and_then(|catalog| catalog.get(b"Pages"))
            .and_then(Object::as_reference)
            .map_err(|_| DocforgeError::malformed("catalog has no /Pages tree"))
    }

    /// Look up `key` on the page, then on each ancestor
    pub(crate) fn inherited_attribute(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = page_id;
        for _ in 0..MAX_TREE_DEPTH {
            let dict = self.inner.get_dictionary(current).ok()?;
            if let Ok(value) = dict.get(key) {
                return Some(value);
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
        }
        None
    }

    /// Copy every inherited attribute onto the page itself so the page
    /// stays correct after it is re-parented.
    pub(crate) fn materialize_inherited(&mut self, page_id: ObjectId) -> Result<()> {
        let inherited: Vec<(&[u8], Object)> = INHERITABLE_KEYS
            .iter()
            .filter_map(|key| {
                self.inherited_attribute(page_id, key)
                    .map(|value| (*key, value.clone()))
            })
            .collect();

        let page = self
            .inner
            .get_dictionary_mut(page_id)
            .map_err(|e| DocforgeError::OperationError(format!("Page {:?}: {}", page_id, e)))?;
        for (key, value) in inherited {
            if !page.has(key) {
                page.set(key.to_vec(), value);
            }
        }
        Ok(())
    }

    fn media_box(&self, page_id: ObjectId) -> MediaBox {
        let Some(obj) = self.inherited_attribute(page_id, b"MediaBox") else {
            return MediaBox::default();
        };
        let obj = match obj {
            Object::Reference(id) => match self.inner.get_object(*id) {
                Ok(resolved) => resolved,
                Err(_) => return MediaBox::default(),
            },
            other => other,
        };

        let numbers: Vec<f32> = obj
            .as_array()
            .map(|arr| arr.iter().filter_map(|o| o.as_float().ok()).collect())
            .unwrap_or_default();

        match numbers.as_slice() {
            [llx, lly, urx, ury] => MediaBox::new(*llx, *lly, *urx, *ury),
            _ => MediaBox::default(),
        }
    }

    fn rotation(&self, page_id: ObjectId) -> Rotation {
        self.inherited_attribute(page_id, b"Rotate")
            .and_then(|obj| obj.as_i64().ok())
            .map(Rotation::from_degrees)
            .unwrap_or_default()
    }
}

/// Follow one level of indirection
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}
