//! Run configuration: everything a caller (in practice, `snapshot-cli`)
//! assembles before calling [`crate::run`].

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use bson::Document;

use crate::document::Id;

/// Output serialization format. See spec §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Jsonl,
    Csv,
    Parquet,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Jsonl => "jsonl",
            Format::Csv => "csv",
            Format::Parquet => "parquet",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Jsonl => "jsonl",
            Format::Csv => "csv",
            Format::Parquet => "parquet",
        }
    }
}

/// Requested (not necessarily effective, see [`Compression`]) codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    Zstd,
    Gzip,
    None,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Gzip => "gzip",
            Compression::None => "none",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Compression::Zstd => ".zst",
            Compression::Gzip => ".gz",
            Compression::None => "",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadConcern {
    Majority,
    Local,
    Linearizable,
    Available,
    Snapshot,
}

/// A mapping function applied to each document as it's read, per spec §4.2
/// step 3 ("If a mapper is supplied, apply it to the document"). The engine
/// never inspects its output beyond treating it as the new document.
pub type Mapper = Arc<dyn Fn(Document) -> Document + Send + Sync>;

/// Emitted roughly every two seconds by the progress worker (spec §5).
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressUpdate {
    pub queue_bytes: u64,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Recognized, stable configuration snapshot persisted into the manifest
/// (spec §3, `Manifest.options`). Only fields that affect resumability or
/// reproducibility are included; purely cosmetic options (telemetry on/off,
/// writer thread count) are not.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ManifestOptions {
    pub batch_size: usize,
    pub rotate_bytes: Option<u64>,
    pub single_file: bool,
    pub parquet_row_group: usize,
    pub parquet_rotate_rows: Option<u64>,
    pub write_chunk_bytes: usize,
    pub compression_level: i32,
}

/// Top-level run configuration.
#[derive(Clone)]
pub struct SnapshotOptions {
    pub collection: String,
    pub output_dir: PathBuf,
    pub prefix: String,
    pub format: Format,
    pub compression: Compression,
    pub compression_level: Option<i32>,
    pub partitions: usize,
    pub batch_size: usize,
    pub queue_bytes: u64,
    pub rotate_bytes: Option<u64>,
    pub single_file: bool,
    pub write_chunk_bytes: usize,
    pub parquet_row_group: usize,
    pub parquet_rotate_rows: Option<u64>,
    pub writer_threads: usize,
    pub query: Document,
    pub projection: Option<Document>,
    pub hint: Option<Document>,
    pub read_preference: ReadPreference,
    pub read_tags: BTreeMap<String, String>,
    pub read_concern: ReadConcern,
    pub no_cursor_timeout: bool,
    pub mapper: Option<Mapper>,
    pub telemetry: bool,
    pub resume_overwrite_incompatible: bool,
    pub dry_run: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl SnapshotOptions {
    pub fn new(collection: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            collection: collection.into(),
            output_dir: output_dir.into(),
            prefix: "snapshot".to_string(),
            format: Format::Jsonl,
            compression: Compression::Zstd,
            compression_level: None,
            partitions: 4,
            batch_size: 1000,
            queue_bytes: 64 * 1024 * 1024,
            rotate_bytes: Some(256 * 1024 * 1024),
            single_file: false,
            write_chunk_bytes: 8 * 1024 * 1024,
            parquet_row_group: 10_000,
            parquet_rotate_rows: None,
            writer_threads: 1,
            query: Document::new(),
            projection: None,
            hint: None,
            read_preference: ReadPreference::Primary,
            read_tags: BTreeMap::new(),
            read_concern: ReadConcern::Local,
            no_cursor_timeout: false,
            mapper: None,
            telemetry: true,
            resume_overwrite_incompatible: false,
            dry_run: false,
            on_progress: None,
        }
    }

    /// Applies the `PL_*` environment variable overrides described in spec
    /// §6, without clobbering values a caller has already set explicitly
    /// via the builder methods below. CLI flags should be applied after
    /// this, so they take final precedence.
    pub fn apply_env_defaults(mut self) -> Self {
        if let Ok(v) = std::env::var("PL_ZSTD_LEVEL") {
            if let Ok(level) = v.parse() {
                self.compression_level = Some(level);
            }
        }
        if let Ok(v) = std::env::var("PL_WRITE_CHUNK_BYTES") {
            if let Ok(bytes) = v.parse() {
                self.write_chunk_bytes = bytes;
            }
        }
        if let Ok(v) = std::env::var("PL_PARQUET_ROW_GROUP") {
            if let Ok(rows) = v.parse() {
                self.parquet_row_group = rows;
            }
        }
        if let Ok(v) = std::env::var("PL_TELEMETRY") {
            self.telemetry = v != "off" && v != "0";
        }
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.manifest.json", self.prefix))
    }

    pub fn manifest_options(&self) -> ManifestOptions {
        ManifestOptions {
            batch_size: self.batch_size,
            rotate_bytes: self.rotate_bytes,
            single_file: self.single_file,
            parquet_row_group: self.parquet_row_group,
            parquet_rotate_rows: self.parquet_rotate_rows,
            write_chunk_bytes: self.write_chunk_bytes,
            compression_level: self.compression_level.unwrap_or(self.compression.default_level()),
        }
    }
}

impl Compression {
    pub fn default_level(self) -> i32 {
        match self {
            Compression::Zstd => 3,
            Compression::Gzip => 1,
            Compression::None => 0,
        }
    }
}

/// A half-open-or-unbounded `_id` range, per spec §3 `PartitionPlan`.
#[derive(Clone, Debug, PartialEq)]
pub struct Range {
    /// Exclusive lower bound (`$gt`), or `None` for "no lower bound".
    pub lower_exclusive: Option<Id>,
    /// Inclusive upper bound (`$lte`), or `None` for "no upper bound".
    pub upper_inclusive: Option<Id>,
}

impl Range {
    pub fn unbounded() -> Self {
        Self {
            lower_exclusive: None,
            upper_inclusive: None,
        }
    }

    /// Renders this range as a MongoDB filter fragment, per spec §3:
    /// `{$gt: a, $lte: b}`, `{$gt: a}`, `{$lte: b}`, or `{}`.
    pub fn to_filter_fragment(&self) -> Document {
        let mut doc = Document::new();
        if let Some(lower) = &self.lower_exclusive {
            doc.insert("$gt", lower.clone());
        }
        if let Some(upper) = &self.upper_inclusive {
            doc.insert("$lte", upper.clone());
        }
        doc
    }

    /// Tightens this range's lower bound to a resumed checkpoint, per spec
    /// §4.2 step 1. The checkpoint must fall within the range already, so
    /// we simply replace the lower bound outright.
    pub fn with_checkpoint(&self, checkpoint: Option<&Id>) -> Self {
        match checkpoint {
            Some(id) => Self {
                lower_exclusive: Some(id.clone()),
                upper_inclusive: self.upper_inclusive.clone(),
            },
            None => self.clone(),
        }
    }
}
