//! PDF Merge algorithm
//!
//! Combines multiple PDFs into a single document.

use crate::error::{PdfToolsError, Result};
use crate::loader::{self, empty_document, inherited_attribute, save_document};
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info};

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Merge multiple PDFs into one
///
/// The algorithm:
/// 1. If empty, return error
/// 2. Create a new destination document with an empty page tree
/// 3. For each source document, in order:
///    a. Copy inherited attributes onto each page
///    b. Calculate ID offset to avoid conflicts
///    c. Import all objects with remapped IDs
///    d. Append its pages to the destination
/// 4. Re-parent pages, drop objects no page reaches, compress
pub fn merge_documents(documents: Vec<Vec<u8>>) -> Result<Vec<u8>> {
    if documents.is_empty() {
        return Err(PdfToolsError::EmptySourceList);
    }

    let (mut dest, pages_id) = empty_document();
    let mut dest_page_refs: Vec<ObjectId> = Vec::new();

    for (i, bytes) in documents.iter().enumerate() {
        let mut source = loader::load(bytes)
            .map_err(|e| {
                debug!(document = i, error = %e, "Failed to load merge source");
                e
            })?
            .into_document();

        flatten_page_attributes(&mut source)?;
        let source_pages: Vec<ObjectId> = source.get_pages().values().copied().collect();
        let source_max_id = source.objects.keys().map(|id| id.0).max().unwrap_or(0);

        // Calculate offset for object IDs to avoid conflicts
        let id_offset = dest.max_id;

        for (old_id, mut object) in std::mem::take(&mut source.objects) {
            remap_object_refs(&mut object, id_offset);
            dest.objects.insert((old_id.0 + id_offset, old_id.1), object);
        }

        dest_page_refs.extend(
            source_pages
                .iter()
                .map(|&(num, gen)| (num + id_offset, gen)),
        );
        dest.max_id = dest.max_id.max(source_max_id + id_offset);
        debug!(document = i, pages = source_pages.len(), "Imported merge source");
    }

    update_page_tree(&mut dest, pages_id, &dest_page_refs)?;

    // Source catalogs and page tree nodes are no longer reachable
    dest.prune_objects();
    dest.compress();

    info!(
        documents = documents.len(),
        pages = dest_page_refs.len(),
        "Merged documents"
    );
    save_document(&mut dest)
}

/// Copy inherited attributes onto every page so a page keeps its geometry
/// and resources once it is detached from its original page tree.
pub(crate) fn flatten_page_attributes(doc: &mut Document) -> Result<()> {
    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        let mut inherited = Vec::new();
        {
            let page = doc.get_object(page_id).and_then(Object::as_dict)?;
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = inherited_attribute(doc, page_id, key) {
                        inherited.push((key, value));
                    }
                }
            }
        }
        if inherited.is_empty() {
            continue;
        }
        let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
        for (key, value) in inherited {
            page.set(key, value);
        }
    }
    Ok(())
}

/// Recursively remap object references in an object
fn remap_object_refs(obj: &mut Object, offset: u32) {
    match obj {
        Object::Reference(id) => id.0 += offset,
        Object::Array(items) => {
            for item in items.iter_mut() {
                remap_object_refs(item, offset);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                remap_object_refs(value, offset);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                remap_object_refs(value, offset);
            }
        }
        _ => {}
    }
}

/// Point the destination page tree at `page_refs` and re-parent each page
fn update_page_tree(doc: &mut Document, pages_id: ObjectId, page_refs: &[ObjectId]) -> Result<()> {
    for &page_id in page_refs {
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|_| PdfToolsError::CorruptDocument("Page is not a dictionary".into()))?;
        page.set("Parent", Object::Reference(pages_id));
    }

    match doc.objects.get_mut(&pages_id) {
        Some(Object::Dictionary(pages_dict)) => {
            let kids = page_refs
                .iter()
                .map(|&id| Object::Reference(id))
                .collect::<Vec<_>>();
            pages_dict.set("Kids", Object::Array(kids));
            pages_dict.set("Count", Object::Integer(page_refs.len() as i64));
            Ok(())
        }
        _ => Err(PdfToolsError::OperationError(
            "Invalid pages dictionary".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::test_support::{create_pdf_with_sizes, create_test_pdf};
    use crate::loader::PageSize;
    use lopdf::{dictionary, Dictionary, Stream};
    use pretty_assertions::assert_eq;

    fn page_contents(bytes: &[u8]) -> Vec<Vec<u8>> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| doc.get_page_content(id).unwrap())
            .collect()
    }

    #[test]
    fn test_merge_empty_fails() {
        let result = merge_documents(vec![]);
        assert!(matches!(result, Err(PdfToolsError::EmptySourceList)));
    }

    #[test]
    fn test_merge_single_document_is_accepted() {
        let pdf = create_test_pdf(2, "Single");
        let result = merge_documents(vec![pdf.clone()]).unwrap();
        assert_eq!(page_contents(&result), page_contents(&pdf));
    }

    #[test]
    fn test_merge_two_documents_combines_pages() {
        let doc_a = create_test_pdf(2, "DocA");
        let doc_b = create_test_pdf(3, "DocB");

        let merged = merge_documents(vec![doc_a, doc_b]).unwrap();

        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 5, "Merged document should have 5 pages");
    }

    #[test]
    fn test_merge_preserves_page_order_and_content() {
        let doc1 = create_test_pdf(2, "First");
        let doc2 = create_test_pdf(1, "Second");
        let doc3 = create_test_pdf(2, "Third");

        let merged = merge_documents(vec![doc1.clone(), doc2.clone(), doc3.clone()]).unwrap();

        let mut expected = page_contents(&doc1);
        expected.extend(page_contents(&doc2));
        expected.extend(page_contents(&doc3));
        assert_eq!(page_contents(&merged), expected);
    }

    #[test]
    fn test_merge_handles_different_sizes() {
        let doc1 = create_test_pdf(10, "Large");
        let doc2 = create_test_pdf(1, "Small");
        let doc3 = create_test_pdf(5, "Medium");

        let merged = merge_documents(vec![doc1, doc2, doc3]).unwrap();

        let doc = Document::load_mem(&merged).unwrap();
        assert_eq!(doc.get_pages().len(), 16, "Merged document should have 16 pages");
    }

    #[test]
    fn test_merge_keeps_page_geometry() {
        let a = create_pdf_with_sizes(&[(612, 792)], "A");
        let b = create_pdf_with_sizes(&[(842, 595), (100, 100)], "B");

        let merged = merge_documents(vec![a, b]).unwrap();
        let doc = loader::load(&merged).unwrap();
        assert_eq!(doc.page_size(1).unwrap(), PageSize::new(612.0, 792.0));
        assert_eq!(doc.page_size(2).unwrap(), PageSize::new(842.0, 595.0));
        assert_eq!(doc.page_size(3).unwrap(), PageSize::new(100.0, 100.0));
    }

    #[test]
    fn test_merge_flattens_inherited_attributes() {
        // MediaBox and Resources live on the Pages node, not the page
        let (mut doc, pages_id) = empty_document();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Times-Roman",
        });
        let content_id = doc.add_object(Stream::new(Dictionary::new(), b"BT ET".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        if let Ok(Object::Dictionary(pages)) = doc.get_object_mut(pages_id) {
            pages.set("Kids", vec![Object::Reference(page_id)]);
            pages.set("Count", Object::Integer(1));
            pages.set(
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 400.into(), 300.into()]),
            );
            pages.set("Resources", dictionary! { "Font" => dictionary! { "F7" => font_id } });
        }
        let inherited = loader::save_document(&mut doc).unwrap();

        let merged = merge_documents(vec![create_test_pdf(1, "Plain"), inherited]).unwrap();
        let out = Document::load_mem(&merged).unwrap();
        let second = *out.get_pages().get(&2).unwrap();
        let page = out.get_object(second).unwrap().as_dict().unwrap();
        assert!(page.has(b"MediaBox"));
        let fonts = page
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Font")
            .unwrap()
            .as_dict()
            .unwrap();
        let font_ref = fonts.get(b"F7").unwrap().as_reference().unwrap();
        assert!(out.get_object(font_ref).is_ok(), "font survives pruning");
    }

    #[test]
    fn test_merge_rejects_corrupt_source() {
        let good = create_test_pdf(1, "Good");
        let result = merge_documents(vec![good, b"garbage".to_vec()]);
        assert!(matches!(result, Err(PdfToolsError::CorruptDocument(_))));
    }
}
