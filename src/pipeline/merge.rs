//! Ordered concatenation of single-document PDFs using lopdf.
//!
//! Each artifact is parsed, renumbered past the objects already collected and
//! its pages appended to one flat page list, strictly in the order given.
//! Source `Catalog`/`Pages` nodes are dropped and a single new page tree is
//! built at the end, so inheritable attributes that lived on a source `Pages`
//! node (`MediaBox`, `Resources`, …) are first copied down onto each page.

use crate::error::Html2PdfError;
use crate::pipeline::render::RenderedArtifact;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed input.
const MAX_TREE_DEPTH: usize = 64;

/// The combined document produced by [`merge_artifacts`].
#[derive(Debug)]
pub struct MergedDocument {
    document: Document,
    page_count: usize,
}

impl MergedDocument {
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Serialise to `path`, returning the number of bytes written.
    pub fn save(&mut self, path: &Path) -> Result<u64, Html2PdfError> {
        let mut bytes = Vec::new();
        self.document
            .save_to(&mut bytes)
            .map_err(|e| Html2PdfError::Internal(format!("Failed to serialise merged PDF: {}", e)))?;

        std::fs::write(path, &bytes).map_err(|source| Html2PdfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }
}

/// Merge rendered artifacts in the order given, releasing each one as soon as
/// its pages have been appended.
///
/// On error the artifacts not yet consumed are dropped with the iterator,
/// which releases their files too.
pub fn merge_artifacts(artifacts: Vec<RenderedArtifact>) -> Result<MergedDocument, Html2PdfError> {
    if artifacts.is_empty() {
        return Err(Html2PdfError::Internal("no documents to merge".into()));
    }

    let mut merger = Merger::new();
    for mut artifact in artifacts {
        let document = Document::load(artifact.path()).map_err(|e| Html2PdfError::Merge {
            index: artifact.index,
            detail: format!("not a readable PDF: {}", e),
        })?;
        let pages = merger.append(artifact.index, document)?;
        artifact.release()?;
        debug!("Appended document {} ({} pages)", artifact.index, pages);
    }

    Ok(merger.finish())
}

/// Accumulates objects and page references across documents.
struct Merger {
    objects: BTreeMap<ObjectId, Object>,
    page_ids: Vec<ObjectId>,
    next_id: u32,
}

impl Merger {
    fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            page_ids: Vec::new(),
            next_id: 1,
        }
    }

    /// Append every page of `document`, returning how many were added.
    fn append(&mut self, index: usize, mut document: Document) -> Result<usize, Html2PdfError> {
        if document.get_pages().is_empty() {
            return Err(Html2PdfError::Merge {
                index,
                detail: "document has no pages".into(),
            });
        }

        flatten_inherited_attributes(&mut document).map_err(|e| Html2PdfError::Merge {
            index,
            detail: format!("broken page tree: {}", e),
        })?;

        document.renumber_objects_with(self.next_id);
        self.next_id = document.max_id + 1;

        // get_pages is keyed by page number, so values come out in page order.
        let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
        let added = page_ids.len();
        self.page_ids.extend(page_ids);

        for (id, object) in document.objects {
            match type_name(&object) {
                Some(b"Catalog") | Some(b"Pages") | Some(b"Outlines") | Some(b"Outline") => {}
                _ => {
                    self.objects.insert(id, object);
                }
            }
        }

        Ok(added)
    }

    fn finish(self) -> MergedDocument {
        let mut document = Document::with_version("1.5");
        document.objects.extend(self.objects);
        // Fresh ids for the new tree must not collide with collected objects.
        document.max_id = self.next_id - 1;

        let pages_id = document.new_object_id();
        let kids: Vec<Object> = self
            .page_ids
            .iter()
            .map(|&id| Object::Reference(id))
            .collect();

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(self.page_ids.len() as i64));
        pages.set("Kids", Object::Array(kids));

        let catalog_id = document.new_object_id();
        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));

        document.objects.insert(pages_id, Object::Dictionary(pages));
        document.objects.insert(catalog_id, Object::Dictionary(catalog));
        document.trailer.set("Root", Object::Reference(catalog_id));

        for &page_id in &self.page_ids {
            if let Ok(Object::Dictionary(page)) = document.get_object_mut(page_id) {
                page.set("Parent", Object::Reference(pages_id));
            }
        }

        MergedDocument {
            document,
            page_count: self.page_ids.len(),
        }
    }
}

fn type_name(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

/// Copy inheritable attributes from ancestor `Pages` nodes onto each page
/// that does not define them itself.
fn flatten_inherited_attributes(document: &mut Document) -> Result<(), lopdf::Error> {
    let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();

    for page_id in page_ids {
        let inherited: Vec<(&[u8], Object)> = {
            let page = document.get_dictionary(page_id)?;
            INHERITABLE_KEYS
                .iter()
                .filter(|key| !page.has(key))
                .filter_map(|key| find_inherited(document, page, key).map(|value| (*key, value)))
                .collect()
        };

        if inherited.is_empty() {
            continue;
        }
        let page = document.get_object_mut(page_id)?.as_dict_mut()?;
        for (key, value) in inherited {
            page.set(key, value);
        }
    }
    Ok(())
}

fn find_inherited(document: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;

    while let Some(id) = parent {
        if depth >= MAX_TREE_DEPTH {
            return None;
        }
        let node = document.get_dictionary(id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    None
}

/// Number of pages in the PDF at `path`.
pub fn page_count(path: &Path) -> Result<usize, lopdf::Error> {
    Ok(Document::load(path)?.get_pages().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::temp::TempTracker;
    use lopdf::{dictionary, Stream};

    /// A PDF with `pages` pages whose content streams contain `label-N`, and
    /// whose MediaBox lives on the Pages node so it must be inherited.
    fn sample_pdf(label: &str, pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        for n in 0..pages {
            let content = format!("BT /F1 12 Tf 72 720 Td ({label}-{n}) Tj ET");
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn artifact(tracker: &TempTracker, index: usize, bytes: &[u8]) -> RenderedArtifact {
        let file = tracker.acquire_with_suffix(".pdf").unwrap();
        std::fs::write(file.path(), bytes).unwrap();
        RenderedArtifact::new(index, bytes.len(), file)
    }

    fn page_contents(document: &Document) -> Vec<String> {
        document
            .get_pages()
            .into_values()
            .map(|id| String::from_utf8_lossy(&document.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn pages_follow_input_order() {
        let tracker = TempTracker::new(None).unwrap();
        let artifacts = vec![
            artifact(&tracker, 0, &sample_pdf("A", 2)),
            artifact(&tracker, 1, &sample_pdf("B", 1)),
            artifact(&tracker, 2, &sample_pdf("C", 3)),
        ];

        let merged = merge_artifacts(artifacts).unwrap();
        assert_eq!(merged.page_count(), 6);

        let contents = page_contents(merged.document());
        let labels: Vec<&str> = ["A-0", "A-1", "B-0", "C-0", "C-1", "C-2"].to_vec();
        for (content, label) in contents.iter().zip(labels) {
            assert!(content.contains(label), "expected {label} in {content}");
        }
        assert_eq!(tracker.live_count(), 0, "every artifact is released");
    }

    #[test]
    fn single_document_is_passed_through() {
        let tracker = TempTracker::new(None).unwrap();
        let merged = merge_artifacts(vec![artifact(&tracker, 0, &sample_pdf("only", 4))]).unwrap();
        assert_eq!(merged.page_count(), 4);
        assert_eq!(merged.document().get_pages().len(), 4);
    }

    #[test]
    fn inherited_media_box_is_copied_to_pages() {
        let tracker = TempTracker::new(None).unwrap();
        let merged = merge_artifacts(vec![artifact(&tracker, 0, &sample_pdf("A", 1))]).unwrap();

        let document = merged.document();
        let page_id = *document.get_pages().values().next().unwrap();
        let page = document.get_dictionary(page_id).unwrap();
        assert!(page.has(b"MediaBox"));
    }

    #[test]
    fn corrupt_artifact_fails_and_releases_the_rest() {
        let tracker = TempTracker::new(None).unwrap();
        let good = sample_pdf("A", 1);
        let artifacts = vec![
            artifact(&tracker, 0, &good),
            artifact(&tracker, 1, &good[..good.len() / 3]),
            artifact(&tracker, 2, &good),
        ];

        let err = merge_artifacts(artifacts).unwrap_err();
        assert!(matches!(err, Html2PdfError::Merge { index: 1, .. }), "got {err}");
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(std::fs::read_dir(tracker.path()).unwrap().count(), 0);
    }

    #[test]
    fn saved_document_reloads_with_same_page_count() {
        let tracker = TempTracker::new(None).unwrap();
        let mut merged = merge_artifacts(vec![
            artifact(&tracker, 0, &sample_pdf("A", 1)),
            artifact(&tracker, 1, &sample_pdf("B", 1)),
        ])
        .unwrap();

        let out = tracker.acquire_with_suffix(".pdf").unwrap();
        let written = merged.save(out.path()).unwrap();
        assert!(written > 0);
        assert_eq!(page_count(out.path()).unwrap(), 2);
    }
}
