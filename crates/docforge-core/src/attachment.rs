//! Embedded-file attachments
//!
//! Attachments live in the catalog's `/Names /EmbeddedFiles` name tree.
//! Each entry maps a name to a file specification whose `/EF /F` entry
//! points at the embedded file stream. Names are unique: registering a
//! file under an existing name replaces the old entry.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use crate::document::resolve;
use crate::error::{DocforgeError, Result};
use crate::metadata::{decode_text_string, encode_text_string};

const MAX_TREE_DEPTH: usize = 16;

/// A named byte payload embedded in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub payload: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Extra entries merged into the embedded file stream and file spec
/// dictionaries, for profiles that need more than name and payload.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileSpecExtras {
    pub stream: Dictionary,
    pub filespec: Dictionary,
}

#[derive(Debug, Clone)]
pub(crate) struct Upserted {
    pub filespec_id: ObjectId,
    /// File specs that previously held the same name
    pub replaced: Vec<ObjectId>,
}

/// All attachments in name-tree order
pub(crate) fn read_attachments(doc: &Document) -> Vec<Attachment> {
    let mut entries = Vec::new();
    if let Some(root) = embedded_files_root(doc) {
        collect_entries(doc, root, 0, &mut entries);
    }

    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let spec = resolve(doc, &value).as_dict().ok()?;
            let name = spec_name(doc, spec).unwrap_or_else(|| decode_text_string(&key));
            let payload = spec_payload(doc, spec)?;
            Some(Attachment { name, payload })
        })
        .collect()
}

/// Embed `attachment`, replacing any entry of the same name
pub(crate) fn upsert_attachment(
    doc: &mut Document,
    attachment: &Attachment,
    extras: FileSpecExtras,
) -> Result<Upserted> {
    let FileSpecExtras {
        stream: stream_extra,
        filespec: spec_extra,
    } = extras;

    let mut stream_dict = dictionary! { "Type" => "EmbeddedFile" };
    for (key, value) in stream_extra.iter() {
        stream_dict.set(key.clone(), value.clone());
    }
    let stream_id = doc.add_object(Stream::new(stream_dict, attachment.payload.clone()));

    let mut spec = dictionary! {
        "Type" => "Filespec",
        "F" => encode_text_string(&attachment.name),
        "UF" => encode_text_string(&attachment.name),
        "EF" => dictionary! { "F" => Object::Reference(stream_id) },
    };
    for (key, value) in spec_extra.iter() {
        spec.set(key.clone(), value.clone());
    }
    let filespec_id = doc.add_object(spec);

    let replaced = register_filespec(doc, &attachment.name, filespec_id)?;
    for id in &replaced {
        remove_filespec(doc, *id);
    }
    unlink_associated_files(doc, &replaced)?;

    debug!(
        "Embedded attachment '{}' ({} bytes, replaced {})",
        attachment.name,
        attachment.payload.len(),
        replaced.len()
    );
    Ok(Upserted {
        filespec_id,
        replaced,
    })
}

/// Point `name` at `filespec_id` in the EmbeddedFiles tree. The tree is
/// rewritten as a single sorted leaf. Returns the file specs the name
/// previously referred to.
fn register_filespec(
    doc: &mut Document,
    name: &str,
    filespec_id: ObjectId,
) -> Result<Vec<ObjectId>> {
    let mut entries = Vec::new();
    if let Some(root) = embedded_files_root(doc) {
        collect_entries(doc, root, 0, &mut entries);
    }

    let mut replaced = Vec::new();
    entries.retain(|(key, value)| {
        let same_name = match resolve(doc, value).as_dict() {
            Ok(spec) => {
                spec_name(doc, spec).unwrap_or_else(|| decode_text_string(key)) == name
            }
            Err(_) => decode_text_string(key) == name,
        };
        if same_name {
            if let Object::Reference(id) = value {
                replaced.push(*id);
            }
        }
        !same_name
    });

    let key = match encode_text_string(name) {
        Object::String(bytes, _) => bytes,
        _ => name.as_bytes().to_vec(),
    };
    entries.push((key, Object::Reference(filespec_id)));
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let names: Vec<Object> = entries
        .into_iter()
        .flat_map(|(key, value)| [Object::String(key, StringFormat::Literal), value])
        .collect();
    let tree_id = doc.add_object(dictionary! { "Names" => names });

    names_dictionary_mut(doc)?.set("EmbeddedFiles", Object::Reference(tree_id));
    Ok(replaced)
}

fn remove_filespec(doc: &mut Document, filespec_id: ObjectId) {
    let stream_ids: Vec<ObjectId> = doc
        .get_dictionary(filespec_id)
        .and_then(|spec| spec.get(b"EF"))
        .and_then(Object::as_dict)
        .map(|ef| ef.iter().filter_map(|(_, v)| v.as_reference().ok()).collect())
        .unwrap_or_default();

    for id in stream_ids {
        doc.objects.remove(&id);
    }
    doc.objects.remove(&filespec_id);
}

/// Drop `removed` file specs from the catalog's `/AF` array. The key goes
/// away entirely once nothing is left in it.
fn unlink_associated_files(doc: &mut Document, removed: &[ObjectId]) -> Result<()> {
    if removed.is_empty() {
        return Ok(());
    }
    let catalog_id = catalog_id(doc)?;
    let Some(af) = doc
        .get_dictionary(catalog_id)
        .ok()
        .and_then(|catalog| catalog.get(b"AF").ok())
        .and_then(|af| resolve(doc, af).as_array().ok())
        .cloned()
    else {
        return Ok(());
    };

    let kept: Vec<Object> = af
        .into_iter()
        .filter(|item| !matches!(item.as_reference(), Ok(id) if removed.contains(&id)))
        .collect();

    let catalog = doc
        .get_dictionary_mut(catalog_id)
        .map_err(|e| DocforgeError::OperationError(format!("Invalid catalog: {}", e)))?;
    if kept.is_empty() {
        catalog.remove(b"AF");
    } else {
        catalog.set("AF", Object::Array(kept));
    }
    Ok(())
}

fn catalog_id(doc: &Document) -> Result<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| DocforgeError::malformed("missing trailer /Root"))
}

/// The catalog's `/Names` dictionary, created inline when absent
fn names_dictionary_mut(doc: &mut Document) -> Result<&mut Dictionary> {
    let catalog_id = catalog_id(doc)?;

    let names_ref = doc
        .get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"Names"))
        .and_then(Object::as_reference)
        .ok();
    if let Some(id) = names_ref {
        return doc
            .get_dictionary_mut(id)
            .map_err(|e| {
                DocforgeError::OperationError(format!("Invalid /Names dictionary: {}", e))
            });
    }

    let catalog = doc
        .get_dictionary_mut(catalog_id)
        .map_err(|e| DocforgeError::OperationError(format!("Invalid catalog: {}", e)))?;
    if !matches!(catalog.get(b"Names"), Ok(Object::Dictionary(_))) {
        catalog.set("Names", Dictionary::new());
    }
    catalog
        .get_mut(b"Names")
        .and_then(Object::as_dict_mut)
        .map_err(|e| DocforgeError::OperationError(format!("Invalid /Names dictionary: {}", e)))
}

fn embedded_files_root(doc: &Document) -> Option<&Object> {
    let catalog_id = doc.trailer.get(b"Root").and_then(Object::as_reference).ok()?;
    let catalog = doc.get_dictionary(catalog_id).ok()?;
    let names = resolve(doc, catalog.get(b"Names").ok()?).as_dict().ok()?;
    names.get(b"EmbeddedFiles").ok()
}

fn collect_entries(
    doc: &Document,
    node: &Object,
    depth: usize,
    out: &mut Vec<(Vec<u8>, Object)>,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    let Ok(dict) = resolve(doc, node).as_dict() else {
        return;
    };

    if let Ok(names) = dict.get(b"Names").map(|o| resolve(doc, o)).and_then(Object::as_array) {
        for pair in names.chunks_exact(2) {
            if let Ok(key) = resolve(doc, &pair[0]).as_str() {
                out.push((key.to_vec(), pair[1].clone()));
            }
        }
    }

    if let Ok(kids) = dict.get(b"Kids").map(|o| resolve(doc, o)).and_then(Object::as_array) {
        for kid in kids {
            collect_entries(doc, kid, depth + 1, out);
        }
    }
}

fn spec_name(doc: &Document, spec: &Dictionary) -> Option<String> {
    [b"UF".as_slice(), b"F".as_slice()]
        .iter()
        .find_map(|key| resolve(doc, spec.get(key).ok()?).as_str().ok())
        .map(decode_text_string)
}

fn spec_payload(doc: &Document, spec: &Dictionary) -> Option<Vec<u8>> {
    let ef = resolve(doc, spec.get(b"EF").ok()?).as_dict().ok()?;
    let stream_ref = ef.get(b"F").or_else(|_| ef.get(b"UF")).ok()?;
    let stream = resolve(doc, stream_ref).as_stream().ok()?;

    if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PdfDocument;
    use crate::test_support::{build_pdf, PageSpec};
    use pretty_assertions::assert_eq;

    fn one_page() -> PdfDocument {
        PdfDocument::parse(&build_pdf(&[PageSpec::text("Invoice")])).unwrap()
    }

    #[test]
    fn test_no_attachments_by_default() {
        assert!(one_page().attachments().is_empty());
    }

    #[test]
    fn test_attachment_survives_serialization() {
        let mut doc = one_page();
        doc.set_attachment(&Attachment::new("notes.txt", b"hello".to_vec()))
            .unwrap();
        let bytes = doc.serialize().unwrap();

        let reparsed = PdfDocument::parse(&bytes).unwrap();
        assert_eq!(
            reparsed.attachments(),
            vec![Attachment::new("notes.txt", b"hello".to_vec())]
        );
    }

    #[test]
    fn test_same_name_replaces() {
        let mut doc = one_page();
        doc.set_attachment(&Attachment::new("factur-x.xml", b"<a/>".to_vec()))
            .unwrap();
        doc.set_attachment(&Attachment::new("factur-x.xml", b"<b/>".to_vec()))
            .unwrap();

        let attachments = doc.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].payload, b"<b/>");
    }

    #[test]
    fn test_distinct_names_sorted() {
        let mut doc = one_page();
        doc.set_attachment(&Attachment::new("z.txt", b"z".to_vec())).unwrap();
        doc.set_attachment(&Attachment::new("a.txt", b"a".to_vec())).unwrap();

        let names: Vec<String> = doc.attachments().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a.txt".to_string(), "z.txt".to_string()]);
    }

    #[test]
    fn test_reads_compressed_payload() {
        let mut doc = one_page();
        doc.set_attachment(&Attachment::new("big.xml", vec![b'x'; 4096]))
            .unwrap();
        doc.inner_mut().compress();
        let bytes = doc.serialize().unwrap();

        let reparsed = PdfDocument::parse(&bytes).unwrap();
        assert_eq!(reparsed.attachments()[0].payload, vec![b'x'; 4096]);
    }

    #[test]
    fn test_replace_unlinks_associated_file() {
        let mut doc = one_page();
        let first = doc
            .set_attachment(&Attachment::new("factur-x.xml", b"<a/>".to_vec()))
            .unwrap();
        let other = doc
            .set_attachment(&Attachment::new("logo.png", b"png".to_vec()))
            .unwrap();
        let catalog_id = doc.catalog_id().unwrap();
        doc.inner_mut()
            .get_dictionary_mut(catalog_id)
            .unwrap()
            .set("AF", vec![Object::Reference(first), Object::Reference(other)]);

        doc.set_attachment(&Attachment::new("factur-x.xml", b"<b/>".to_vec()))
            .unwrap();

        let af = doc
            .inner()
            .get_dictionary(catalog_id)
            .unwrap()
            .get(b"AF")
            .and_then(Object::as_array)
            .unwrap()
            .clone();
        assert_eq!(af, vec![Object::Reference(other)]);
        assert!(!doc.inner().objects.contains_key(&first));
    }

    #[test]
    fn test_replace_drops_emptied_associated_files() {
        let mut doc = one_page();
        let first = doc
            .set_attachment(&Attachment::new("factur-x.xml", b"<a/>".to_vec()))
            .unwrap();
        let catalog_id = doc.catalog_id().unwrap();
        doc.inner_mut()
            .get_dictionary_mut(catalog_id)
            .unwrap()
            .set("AF", vec![Object::Reference(first)]);

        doc.set_attachment(&Attachment::new("factur-x.xml", b"<b/>".to_vec()))
            .unwrap();

        assert!(!doc.inner().get_dictionary(catalog_id).unwrap().has(b"AF"));
    }
}
