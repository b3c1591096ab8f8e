//! Format-agnostic writer contract (spec §4.4) plus the three concrete
//! serializers.

mod compression;
mod csv_writer;
mod jsonl;
mod parquet_writer;
mod part_sink;

pub use compression::CompressedWriter;
pub use part_sink::infer_columns;

use std::sync::Arc;

use bson::Document;

use crate::{
    config::{Compression, Format, SnapshotOptions},
    error::Result,
    manifest::Manifest,
};

/// What a reader hands the writer for one partition's batch (spec §3
/// `QueueItem`, §4.2 step 4): either pre-serialized JSONL bytes or a raw
/// document sequence, for formats that need structured field access.
pub enum Batch {
    /// Pre-assembled, newline-terminated JSON lines (JSONL fast path).
    Lines { bytes: Vec<u8>, rows: u64 },
    Documents(Vec<Document>),
}

impl Batch {
    pub fn row_count(&self) -> u64 {
        match self {
            Batch::Lines { rows, .. } => *rows,
            Batch::Documents(docs) => docs.len() as u64,
        }
    }
}

/// A format-specific writer, driven by the single writer thread.
pub trait SnapshotWriter: Send {
    /// Appends one batch to the current part, rotating first if needed.
    fn write_many(&mut self, batch: Batch) -> Result<()>;

    /// Finalizes whatever part is currently open. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Constructs the writer matching `options.format`, resuming part
/// numbering from `resume_seq` (spec §4.4 "File naming": seq is monotonic
/// per writer, so a resumed run must not reuse a completed part's name).
pub fn build(
    options: &SnapshotOptions,
    manifest: Arc<Manifest>,
    resume_seq: u64,
) -> Result<Box<dyn SnapshotWriter>> {
    let level = options
        .compression_level
        .unwrap_or_else(|| options.compression.default_level());

    match options.format {
        Format::Jsonl => Ok(Box::new(jsonl::JsonlWriter::new(
            part_sink::PartSink::new(
                options.output_dir.clone(),
                options.prefix.clone(),
                Format::Jsonl.extension(),
                options.compression,
                level,
                options.rotate_bytes,
                options.single_file,
                manifest,
                resume_seq,
                true,
            ),
            options.write_chunk_bytes,
        ))),
        Format::Csv => Ok(Box::new(csv_writer::CsvWriter::new(part_sink::PartSink::new(
            options.output_dir.clone(),
            options.prefix.clone(),
            Format::Csv.extension(),
            options.compression,
            level,
            options.rotate_bytes,
            options.single_file,
            manifest,
            resume_seq,
            true,
        )))),
        Format::Parquet => Ok(Box::new(parquet_writer::ParquetWriter::new(
            options.output_dir.clone(),
            options.prefix.clone(),
            options.compression,
            options.rotate_bytes,
            options.single_file,
            manifest,
            resume_seq,
            options.parquet_row_group,
            options.parquet_rotate_rows,
        ))),
    }
}

/// The compression actually in effect for a run, accounting for the
/// zstd -> gzip availability downgrade (spec §7 "Codec unavailable").
/// Parquet's compression is an internal, per-column codec that the
/// `parquet` crate always provides, so only JSONL/CSV are ever downgraded.
pub(crate) fn effective_compression_for(format: Format, requested: Compression) -> Compression {
    match format {
        Format::Parquet => requested,
        Format::Jsonl | Format::Csv => compression::effective_compression(requested),
    }
}

pub(crate) fn parquet_codec(compression: Compression) -> parquet::basic::Compression {
    use parquet::basic::{Compression as PqCompression, GzipLevel, ZstdLevel};
    match compression {
        Compression::Zstd => {
            PqCompression::ZSTD(ZstdLevel::try_new(3).unwrap_or(ZstdLevel::default()))
        }
        Compression::Gzip => {
            PqCompression::GZIP(GzipLevel::try_new(6).unwrap_or(GzipLevel::default()))
        }
        Compression::None => PqCompression::UNCOMPRESSED,
    }
}
