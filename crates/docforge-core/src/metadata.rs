//! Document information dictionary (`/Info`)
//!
//! Metadata is a flat string map. Values are PDF text strings: UTF-16BE
//! when they start with a byte-order mark, otherwise UTF-8 with a Latin-1
//! fallback for legacy PDFDocEncoding producers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object, StringFormat};
use serde::{Deserialize, Serialize};

use crate::document::resolve;

pub const TITLE: &str = "Title";
pub const AUTHOR: &str = "Author";
pub const SUBJECT: &str = "Subject";
pub const PRODUCER: &str = "Producer";
pub const MOD_DATE: &str = "ModDate";

/// Flat string-keyed document metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Metadata(iter.into_iter().collect())
    }
}

/// Read the trailer's `/Info` dictionary. Keys whose values are not
/// strings or names (nested dictionaries, numbers) are skipped.
pub(crate) fn read_info(doc: &Document) -> Metadata {
    let Some(info) = info_dictionary(doc) else {
        return Metadata::new();
    };

    info.iter()
        .filter_map(|(key, value)| {
            let value = resolve(doc, value);
            let text = match value {
                Object::String(bytes, _) => decode_text_string(bytes),
                Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
                _ => return None,
            };
            Some((String::from_utf8_lossy(key).into_owned(), text))
        })
        .collect()
}

/// Make the text entries of `/Info` match `metadata`. Entries whose
/// decoded value is unchanged keep their original object, so names such as
/// `/Trapped /False` and non-text values survive. An existing indirect Info
/// object is updated in place so other references stay valid.
pub(crate) fn write_info(doc: &mut Document, metadata: &Metadata) {
    let current = read_info(doc);
    let mut dict = info_dictionary(doc).cloned().unwrap_or_default();

    for key in current.keys() {
        if !metadata.contains_key(key) {
            dict.remove(key.as_bytes());
        }
    }
    for (key, value) in metadata.iter() {
        if current.get(key) != Some(value) {
            dict.set(key.as_bytes().to_vec(), encode_text_string(value));
        }
    }

    let existing_id = doc
        .trailer
        .get(b"Info")
        .and_then(Object::as_reference)
        .ok();

    match existing_id {
        Some(id) if doc.objects.contains_key(&id) => {
            doc.objects.insert(id, Object::Dictionary(dict));
        }
        _ => {
            let id = doc.add_object(Object::Dictionary(dict));
            doc.trailer.set("Info", Object::Reference(id));
        }
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    resolve(doc, info).as_dict().ok()
}

/// Decode a PDF text string
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Encode a PDF text string: a plain literal for ASCII, UTF-16BE with BOM otherwise
pub fn encode_text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Format a timestamp as a PDF date string (`D:YYYYMMDDHHmmSS+00'00'`)
pub fn pdf_date(at: DateTime<Utc>) -> String {
    format!("D:{}+00'00'", at.format("%Y%m%d%H%M%S"))
}
