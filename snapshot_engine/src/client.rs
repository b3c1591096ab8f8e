//! Abstraction over "the MongoDB client library", which spec §1 explicitly
//! treats as an external collaborator: "The spec assumes a client object
//! exposing `find(filter, sort, hint, projection, batchSize) -> cursor`,
//! `estimated_document_count`, and access to primary-key bounds."
//!
//! [`CollectionClient`] is that assumed object. The engine depends only on
//! this trait; [`MongoCollectionClient`] (feature `mongo_client`) is the one
//! real implementation, backed by the synchronous `mongodb` driver API. The
//! integration test suite supplies its own in-memory implementation.

use bson::Document;

use crate::{config::ReadConcern, config::ReadPreference, document::Id, error::Result};

/// Sort direction for a `find` call. The engine only ever sorts ascending
/// by `_id`, but the trait keeps this explicit rather than implicit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug)]
pub struct FindSpec {
    pub filter: Document,
    pub sort_field: &'static str,
    pub sort_direction: SortDirection,
    pub hint: Option<Document>,
    pub projection: Option<Document>,
    pub batch_size: u32,
    pub limit: Option<i64>,
    pub read_preference: ReadPreference,
    pub read_concern: ReadConcern,
    pub no_cursor_timeout: bool,
}

impl FindSpec {
    pub fn sorted_by_id(filter: Document, direction: SortDirection) -> Self {
        Self {
            filter,
            sort_field: "_id",
            sort_direction: direction,
            hint: None,
            projection: None,
            batch_size: 1000,
            limit: None,
            read_preference: ReadPreference::Primary,
            read_concern: ReadConcern::Local,
            no_cursor_timeout: false,
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A live, server-side sorted cursor over documents matching a [`FindSpec`].
pub trait DocumentCursor: Send {
    /// Fetches the next document, or `None` on exhaustion.
    fn next(&mut self) -> Result<Option<Document>>;
}

/// The collaborator spec §1 describes. Implementors must guarantee that
/// `find` with `sort_field = "_id"` returns documents in strictly
/// increasing (or decreasing) `_id` order -- the engine's ordering
/// invariants (spec §4.2, §8) depend on it.
pub trait CollectionClient: Send + Sync {
    fn find(&self, spec: FindSpec) -> Result<Box<dyn DocumentCursor>>;

    fn estimated_document_count(&self) -> Result<u64>;

    /// Convenience built on top of `find`: the single smallest/largest
    /// matching `_id`, used by the timestamp planner (spec §4.1) to find
    /// `min_id`/`max_id`.
    fn find_one_id(&self, filter: Document, direction: SortDirection) -> Result<Option<Id>> {
        let spec = FindSpec::sorted_by_id(filter, direction).limit(1);
        let mut cursor = self.find(spec)?;
        Ok(cursor.next()?.and_then(|doc| doc.get("_id").cloned()))
    }
}

#[cfg(feature = "mongo_client")]
pub use mongo::MongoCollectionClient;

#[cfg(feature = "mongo_client")]
mod mongo {
    use super::*;
    use crate::error::ErrorKind;
    use mongodb::{
        bson::doc,
        options::{Collation, FindOptions, ReadConcern as DriverReadConcern},
        sync::Collection,
    };

    /// [`CollectionClient`] backed by the real, synchronous `mongodb` driver.
    ///
    /// This is the crate's one dependency on an actual MongoDB wire client;
    /// everything else in the engine talks to [`CollectionClient`] only.
    pub struct MongoCollectionClient {
        collection: Collection<Document>,
    }

    impl MongoCollectionClient {
        pub fn new(collection: Collection<Document>) -> Self {
            Self { collection }
        }
    }

    fn read_concern(rc: ReadConcern) -> DriverReadConcern {
        match rc {
            ReadConcern::Majority => DriverReadConcern::majority(),
            ReadConcern::Local => DriverReadConcern::local(),
            ReadConcern::Linearizable => DriverReadConcern::linearizable(),
            ReadConcern::Available => DriverReadConcern::available(),
            ReadConcern::Snapshot => DriverReadConcern::snapshot(),
        }
    }

    impl CollectionClient for MongoCollectionClient {
        fn find(&self, spec: FindSpec) -> Result<Box<dyn DocumentCursor>> {
            let sort_dir = match spec.sort_direction {
                SortDirection::Ascending => 1,
                SortDirection::Descending => -1,
            };
            let mut options = FindOptions::builder()
                .sort(doc! { spec.sort_field: sort_dir })
                .batch_size(spec.batch_size)
                .no_cursor_timeout(spec.no_cursor_timeout)
                .read_concern(read_concern(spec.read_concern))
                .collation(None::<Collation>)
                .build();
            options.hint = spec.hint.map(mongodb::options::Hint::Keys);
            options.projection = spec.projection;
            options.limit = spec.limit;
            let _ = spec.read_preference; // selected at client-construction time in the real driver

            let cursor = self
                .collection
                .find(spec.filter, options)
                .map_err(|e| ErrorKind::Cursor.with_source(e))?;
            Ok(Box::new(MongoCursor { cursor }))
        }

        fn estimated_document_count(&self) -> Result<u64> {
            self.collection
                .estimated_document_count(None)
                .map(|n| n as u64)
                .map_err(|e| ErrorKind::Cursor.with_source(e))
        }
    }

    struct MongoCursor {
        cursor: mongodb::sync::Cursor<Document>,
    }

    impl DocumentCursor for MongoCursor {
        fn next(&mut self) -> Result<Option<Document>> {
            match std::iter::Iterator::next(&mut self.cursor) {
                Some(Ok(doc)) => Ok(Some(doc)),
                Some(Err(e)) => Err(ErrorKind::Cursor.with_source(e)),
                None => Ok(None),
            }
        }
    }
}
