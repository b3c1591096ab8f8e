//! Divides the keyspace matched by the base query into N contiguous,
//! disjoint, ordered `_id` ranges (spec §4.1).

use bson::{oid::ObjectId, Bson, Document};

use crate::{
    client::{CollectionClient, SortDirection},
    config::Range,
    error::{ErrorKind, Result},
};

/// An ordered sequence of ranges that together cover every document the
/// base query matches, exactly once.
pub type PartitionPlan = Vec<Range>;

/// Produces a [`PartitionPlan`] for `n` partitions over `collection`
/// filtered by `base_query`.
///
/// Tries the timestamp planner first (spec §4.1, "default, preferred for
/// time-prefixed identifiers"), falling back to cursor sampling when the
/// bounds aren't `ObjectId`s or the span is non-positive.
pub fn plan(
    collection: &dyn CollectionClient,
    base_query: &Document,
    n: usize,
) -> Result<PartitionPlan> {
    if n == 0 {
        return Err(ErrorKind::Partitioner.with_message("partition count must be >= 1"));
    }

    let min_id = collection.find_one_id(base_query.clone(), SortDirection::Ascending)?;
    let max_id = collection.find_one_id(base_query.clone(), SortDirection::Descending)?;

    let (min_id, max_id) = match (min_id, max_id) {
        (Some(min), Some(max)) => (min, max),
        // Empty collection (or empty under this filter): one empty-filter range.
        _ => return Ok(vec![Range::unbounded()]),
    };

    if n == 1 {
        return Ok(vec![Range::unbounded()]);
    }

    match timestamp_plan(collection, base_query, &min_id, &max_id, n)? {
        Some(plan) => Ok(plan),
        None => cursor_sampling_plan(collection, base_query, n),
    }
}

/// Timestamp planner (spec §4.1): step by generation-time seconds across
/// `[min_id, max_id]`, resolving each synthetic boundary to the first real
/// `_id` strictly greater than it.
fn timestamp_plan(
    collection: &dyn CollectionClient,
    base_query: &Document,
    min_id: &Bson,
    max_id: &Bson,
    n: usize,
) -> Result<Option<PartitionPlan>> {
    let (Some(min_oid), Some(max_oid)) = (as_object_id(min_id), as_object_id(max_id)) else {
        return Ok(None);
    };

    let tmin = min_oid.timestamp().to_chrono().timestamp();
    let tmax = max_oid.timestamp().to_chrono().timestamp();
    if tmax <= tmin {
        return Ok(None);
    }

    let span = tmax - tmin;
    let step = std::cmp::max(span / (n as i64), 1);

    let mut inner_boundaries = Vec::with_capacity(n - 1);
    let mut last_boundary: Option<Bson> = None;
    for i in 1..n {
        let synthetic_time = tmin + (i as i64) * step;
        let synthetic_id = synthetic_object_id(synthetic_time);

        let mut filter = base_query.clone();
        filter.insert("_id", bson::doc! { "$gt": Bson::ObjectId(synthetic_id) });
        let boundary = collection.find_one_id(filter, SortDirection::Ascending)?;

        match boundary {
            Some(id) if Some(&id) != last_boundary.as_ref() => {
                last_boundary = Some(id.clone());
                inner_boundaries.push(id);
            }
            // Duplicate or exhausted boundary: skip it, never emit a
            // zero-width range (spec §4.1 "Tie-break and edge cases").
            _ => {}
        }
    }

    Ok(Some(ranges_from_boundaries(inner_boundaries)))
}

/// Cursor-sampling planner (spec §4.1 fallback).
fn cursor_sampling_plan(
    collection: &dyn CollectionClient,
    base_query: &Document,
    n: usize,
) -> Result<PartitionPlan> {
    let total = collection.estimated_document_count()?;

    if total <= (n as u64) * 5000 {
        // Small collection: use the first N-1 sorted documents as endpoints.
        let mut cursor = collection.find(
            crate::client::FindSpec::sorted_by_id(base_query.clone(), SortDirection::Ascending)
                .limit((n - 1) as i64),
        )?;
        let mut boundaries = Vec::with_capacity(n - 1);
        while let Some(doc) = cursor.next()? {
            boundaries.push(crate::document::document_id(&doc)?);
        }
        return Ok(ranges_from_boundaries(boundaries));
    }

    // Larger collection: scan sorted `_id`s, taking every floor(total/n)-th key.
    let stride = std::cmp::max(total / (n as u64), 1);
    let mut projection = Document::new();
    projection.insert("_id", 1);
    let mut spec = crate::client::FindSpec::sorted_by_id(base_query.clone(), SortDirection::Ascending);
    spec.projection = Some(projection);
    let mut cursor = collection.find(spec)?;

    let mut boundaries = Vec::new();
    let mut index: u64 = 0;
    while let Some(doc) = cursor.next()? {
        if boundaries.len() >= n - 1 {
            break;
        }
        index += 1;
        if index % stride == 0 {
            boundaries.push(crate::document::document_id(&doc)?);
        }
    }

    Ok(ranges_from_boundaries(boundaries))
}

/// Builds contiguous ranges from a sorted, deduplicated list of inner
/// boundaries: the first range is left-unbounded, the last is
/// right-unbounded, and every consecutive pair shares an endpoint.
fn ranges_from_boundaries(boundaries: Vec<Bson>) -> PartitionPlan {
    let mut ranges = Vec::with_capacity(boundaries.len() + 1);
    let mut lower: Option<Bson> = None;
    for boundary in boundaries {
        ranges.push(Range {
            lower_exclusive: lower.clone(),
            upper_inclusive: Some(boundary.clone()),
        });
        lower = Some(boundary);
    }
    ranges.push(Range {
        lower_exclusive: lower,
        upper_inclusive: None,
    });
    ranges
}

fn as_object_id(value: &Bson) -> Option<ObjectId> {
    match value {
        Bson::ObjectId(oid) => Some(*oid),
        _ => None,
    }
}

fn synthetic_object_id(unix_seconds: i64) -> ObjectId {
    // ObjectId's first 4 bytes are a big-endian Unix timestamp in seconds;
    // the rest can be anything as long as it sorts consistently for a given
    // timestamp, so we use all-zero bytes the way a "floor" boundary would.
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&(unix_seconds as u32).to_be_bytes());
    ObjectId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_from_boundaries_are_contiguous() {
        let b1 = Bson::Int32(10);
        let b2 = Bson::Int32(20);
        let ranges = ranges_from_boundaries(vec![b1.clone(), b2.clone()]);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].lower_exclusive, None);
        assert_eq!(ranges[0].upper_inclusive, Some(b1.clone()));
        assert_eq!(ranges[1].lower_exclusive, Some(b1));
        assert_eq!(ranges[1].upper_inclusive, Some(b2.clone()));
        assert_eq!(ranges[2].lower_exclusive, Some(b2));
        assert_eq!(ranges[2].upper_inclusive, None);
    }

    #[test]
    fn no_boundaries_yields_single_unbounded_range() {
        let ranges = ranges_from_boundaries(vec![]);
        assert_eq!(ranges, vec![Range::unbounded()]);
    }
}
