//! An in-memory stand-in for the real MongoDB client, used by this crate's
//! integration tests.
//!
//! Grounded directly in the teacher's `tests/mock_engine` simulated
//! backend: like that module's `Container`/`Partition::get_data` paging by
//! continuation token, this is deliberately simple and depends on a few
//! assumptions that would not hold against a real server -- filter matching
//! supports only the operators the engine itself emits (top-level equality
//! and an `_id: {$gt, $lte}` range), not general MongoDB query syntax.

use std::{cmp::Ordering, sync::Mutex};

use bson::{Bson, Document};

use snapshot_engine::client::{CollectionClient, DocumentCursor, FindSpec, SortDirection};
use snapshot_engine::Result;

/// An in-memory collection. Documents are kept sorted by `_id` so `find`
/// can serve ascending/descending sorted cursors the way a real index scan
/// would.
pub struct MockClient {
    documents: Mutex<Vec<Document>>,
}

impl MockClient {
    pub fn new(mut documents: Vec<Document>) -> Self {
        documents.sort_by(|a, b| compare_ids(a, b));
        Self {
            documents: Mutex::new(documents),
        }
    }

    pub fn insert(&self, doc: Document) {
        let mut documents = self.documents.lock().unwrap();
        documents.push(doc);
        documents.sort_by(|a, b| compare_ids(a, b));
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

fn compare_ids(a: &Document, b: &Document) -> Ordering {
    match (a.get("_id"), b.get("_id")) {
        (Some(a), Some(b)) => compare_bson(a, b),
        _ => Ordering::Equal,
    }
}

/// A best-effort total order over the BSON variants this engine's own
/// ranges and sorts ever produce. Not a general BSON comparison.
fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::ObjectId(a), Bson::ObjectId(b)) => a.cmp(b),
        (Bson::Int32(a), Bson::Int32(b)) => a.cmp(b),
        (Bson::Int64(a), Bson::Int64(b)) => a.cmp(b),
        (Bson::Int32(a), Bson::Int64(b)) => (*a as i64).cmp(b),
        (Bson::Int64(a), Bson::Int32(b)) => a.cmp(&(*b as i64)),
        (Bson::Double(a), Bson::Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Bson::String(a), Bson::String(b)) => a.cmp(b),
        (Bson::DateTime(a), Bson::DateTime(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| match (key.as_str(), value) {
        ("_id", Bson::Document(ops)) if ops.contains_key("$gt") || ops.contains_key("$lte") => {
            let Some(id) = doc.get("_id") else { return false };
            if let Some(gt) = ops.get("$gt") {
                if compare_bson(id, gt) != Ordering::Greater {
                    return false;
                }
            }
            if let Some(lte) = ops.get("$lte") {
                if compare_bson(id, lte) == Ordering::Greater {
                    return false;
                }
            }
            true
        }
        (key, value) => doc.get(key) == Some(value),
    })
}

impl CollectionClient for MockClient {
    fn find(&self, spec: FindSpec) -> Result<Box<dyn DocumentCursor>> {
        let documents = self.documents.lock().unwrap();
        let mut matched: Vec<Document> = documents.iter().filter(|d| matches(d, &spec.filter)).cloned().collect();

        matched.sort_by(|a, b| {
            let ord = compare_ids(a, b);
            match spec.sort_direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });

        if let Some(limit) = spec.limit {
            matched.truncate(limit.max(0) as usize);
        }
        if let Some(projection) = &spec.projection {
            matched = matched.into_iter().map(|doc| apply_projection(doc, projection)).collect();
        }

        Ok(Box::new(MockCursor {
            items: matched.into_iter(),
        }))
    }

    fn estimated_document_count(&self) -> Result<u64> {
        Ok(self.documents.lock().unwrap().len() as u64)
    }
}

fn apply_projection(doc: Document, projection: &Document) -> Document {
    let keep: Vec<&str> = projection
        .iter()
        .filter(|(_, v)| matches!(v, Bson::Int32(1) | Bson::Boolean(true)))
        .map(|(k, _)| k.as_str())
        .collect();
    if keep.is_empty() {
        return doc;
    }
    let mut out = Document::new();
    for key in keep {
        if let Some(value) = doc.get(key) {
            out.insert(key, value.clone());
        }
    }
    out
}

pub struct MockCursor {
    items: std::vec::IntoIter<Document>,
}

impl DocumentCursor for MockCursor {
    fn next(&mut self) -> Result<Option<Document>> {
        Ok(self.items.next())
    }
}
