//! PDF Merge algorithm
//!
//! Combines multiple PDFs into a single document.

use lopdf::{Object, ObjectId};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::document::{PdfDocument, INHERITABLE_KEYS};
use crate::error::{DocforgeError, Result};

/// Merge serialized PDFs into one, pages in input order
pub fn merge_documents(sources: &[Vec<u8>]) -> Result<Vec<u8>> {
    if sources.len() < 2 {
        return Err(DocforgeError::InvalidInput(format!(
            "Merge needs at least 2 documents, got {}",
            sources.len()
        )));
    }

    // Load all documents first; one bad source aborts the merge
    let mut loaded = Vec::with_capacity(sources.len());
    for (i, bytes) in sources.iter().enumerate() {
        let doc = PdfDocument::parse(bytes).map_err(|e| match e {
            DocforgeError::MalformedInput { reason, .. } => {
                DocforgeError::malformed_source(i + 1, reason)
            }
            other => other,
        })?;
        loaded.push(doc);
    }

    let input_size: usize = sources.iter().map(Vec::len).sum();
    let mut merged = merge(loaded)?;
    let output = merged.serialize()?;

    info!(
        "Merged {} documents into {} pages ({} -> {} bytes)",
        sources.len(),
        merged.page_count(),
        input_size,
        output.len()
    );
    Ok(output)
}

/// Merge parsed documents
///
/// The algorithm:
/// 1. Copy inherited attributes onto every page so pages can be re-parented
/// 2. Use the first document as the destination
/// 3. For each further source:
///    a. Offset its object IDs past the destination's highest ID
///    b. Import all objects with remapped references
///    c. Append its pages to the destination page list
/// 4. Rebuild the destination page tree as a single flat Kids array
/// 5. Drop objects no longer reachable (source catalogs, old tree nodes)
pub fn merge(documents: Vec<PdfDocument>) -> Result<PdfDocument> {
    if documents.len() < 2 {
        return Err(DocforgeError::InvalidInput(format!(
            "Merge needs at least 2 documents, got {}",
            documents.len()
        )));
    }

    let mut prepared = Vec::with_capacity(documents.len());
    for mut doc in documents {
        let page_ids: Vec<ObjectId> = doc.pages().iter().map(|page| page.id).collect();
        for page_id in &page_ids {
            doc.materialize_inherited(*page_id)?;
        }
        prepared.push((doc, page_ids));
    }

    let (dest, mut dest_page_refs) = prepared.remove(0);
    let pages_id = dest.pages_root_id()?;
    let mut dest = dest.into_inner();
    let mut dest_max_id = dest.max_id;

    for (source, source_pages) in prepared {
        let source = source.into_inner();
        let id_offset = dest_max_id;

        let mut remapped_objects = BTreeMap::new();
        for (old_id, object) in source.objects.into_iter() {
            let new_id = (old_id.0 + id_offset, old_id.1);
            remapped_objects.insert(new_id, remap_object_refs(object, id_offset));
        }
        dest.objects.extend(remapped_objects);

        for old_page_ref in source_pages {
            dest_page_refs.push((old_page_ref.0 + id_offset, old_page_ref.1));
        }

        dest_max_id = (source.max_id + id_offset).max(dest_max_id);
        debug!("Imported source with ID offset {}", id_offset);
    }

    dest.max_id = dest_max_id;
    let mut merged = PdfDocument::from_inner(dest);
    update_page_tree(&mut merged, pages_id, &dest_page_refs)?;
    merged.inner_mut().prune_objects();

    Ok(merged)
}

/// Recursively remap object references in an object
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Point the root Pages node at `page_refs` and re-parent every page to it
fn update_page_tree(
    doc: &mut PdfDocument,
    pages_id: ObjectId,
    page_refs: &[ObjectId],
) -> Result<()> {
    let inner = doc.inner_mut();

    for page_id in page_refs {
        let page = inner
            .get_dictionary_mut(*page_id)
            .map_err(|e| DocforgeError::OperationError(format!("Page {:?}: {}", page_id, e)))?;
        page.set("Parent", Object::Reference(pages_id));
    }

    let pages_dict = inner
        .get_dictionary_mut(pages_id)
        .map_err(|_| DocforgeError::OperationError("Invalid pages dictionary".into()))?;

    let kids = page_refs
        .iter()
        .map(|&id| Object::Reference(id))
        .collect::<Vec<_>>();
    pages_dict.set("Kids", Object::Array(kids));
    pages_dict.set("Count", Object::Integer(page_refs.len() as i64));

    // Every page now carries its own copy; a value left here would leak
    // into pages imported from other sources.
    for key in INHERITABLE_KEYS {
        pages_dict.remove(key);
    }

    Ok(())
}
