//! JSONL writer (spec §4.4.1).

use super::part_sink::PartSink;
use super::{Batch, SnapshotWriter};
use crate::{document, error::Result};

/// Writes newline-delimited JSON, in chunks bounded by `write_chunk_bytes`
/// so a single oversized batch doesn't force one giant allocation/write
/// (spec §4.4.1).
pub struct JsonlWriter {
    sink: PartSink,
    write_chunk_bytes: usize,
}

impl JsonlWriter {
    pub fn new(sink: PartSink, write_chunk_bytes: usize) -> Self {
        Self {
            sink,
            write_chunk_bytes,
        }
    }

    fn write_chunked(&mut self, bytes: &[u8], rows: u64) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if bytes.len() <= self.write_chunk_bytes {
            self.sink.write_raw(bytes, rows)?;
        } else {
            // Split on chunk boundaries but never mid-line: walk forward
            // from each chunk boundary to the next newline.
            let mut start = 0;
            while start < bytes.len() {
                let tentative_end = (start + self.write_chunk_bytes).min(bytes.len());
                let end = if tentative_end >= bytes.len() {
                    bytes.len()
                } else {
                    match bytes[start..tentative_end].iter().rposition(|&b| b == b'\n') {
                        Some(pos) => start + pos + 1,
                        None => tentative_end,
                    }
                };
                let chunk = &bytes[start..end];
                let chunk_rows = chunk.iter().filter(|&&b| b == b'\n').count() as u64;
                self.sink.write_raw(chunk, chunk_rows)?;
                start = end;
            }
            let _ = rows; // row accounting happens per-chunk above via newline counts
        }
        self.sink.maybe_rotate()
    }
}

impl SnapshotWriter for JsonlWriter {
    fn write_many(&mut self, batch: Batch) -> Result<()> {
        match batch {
            Batch::Lines { bytes, rows } => self.write_chunked(&bytes, rows),
            Batch::Documents(docs) => {
                let mut buf = Vec::new();
                for doc in &docs {
                    buf.extend_from_slice(document::to_jsonl_line(doc)?.as_bytes());
                }
                self.write_chunked(&buf, docs.len() as u64)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.sink.close()
    }
}
