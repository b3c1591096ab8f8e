//! CSV writer (spec §4.4.2): RFC-4180, inferred columns, embedded-JSON for
//! nested values.

use super::part_sink::{infer_columns, PartSink};
use super::{Batch, SnapshotWriter};
use crate::{document, error::{ErrorKind, Result}};

pub struct CsvWriter {
    sink: PartSink,
    columns: Option<Vec<String>>,
}

impl CsvWriter {
    pub fn new(sink: PartSink) -> Self {
        Self {
            sink,
            columns: None,
        }
    }

    /// Renders one batch of documents as CSV rows. A header is emitted
    /// whenever the current part is still empty, so each rotated part gets
    /// its own header (spec §4.4.2, §4.4 "File naming").
    fn render(&mut self, documents: &[bson::Document], emit_header: bool) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if self.columns.is_none() {
            self.columns = Some(infer_columns(documents));
        }
        let columns = self.columns.clone().unwrap_or_default();

        let mut writer = csv::WriterBuilder::new().from_writer(&mut buf);
        if emit_header {
            writer
                .write_record(columns.iter())
                .map_err(|e| ErrorKind::Writer.with_source(e))?;
        }
        for doc in documents {
            let mut record = Vec::with_capacity(columns.len());
            for column in &columns {
                let field = match doc.get(column) {
                    Some(value) => document::bson_to_csv_field(value),
                    None => String::new(),
                };
                record.push(field);
            }
            writer
                .write_record(&record)
                .map_err(|e| ErrorKind::Writer.with_source(e))?;
        }
        writer.flush().map_err(|e| ErrorKind::Writer.with_source(e))?;
        drop(writer);
        Ok(buf)
    }
}

impl SnapshotWriter for CsvWriter {
    fn write_many(&mut self, batch: Batch) -> Result<()> {
        let Batch::Documents(documents) = batch else {
            return Err(ErrorKind::Internal.with_message("CSV writer received a pre-serialized batch"));
        };
        if documents.is_empty() {
            return Ok(());
        }
        self.sink.ensure_open()?;
        let emit_header = self.sink.current_part_bytes() == 0;
        let rendered = self.render(&documents, emit_header)?;
        self.sink.write_raw(&rendered, documents.len() as u64)?;
        self.sink.maybe_rotate()
    }

    fn close(&mut self) -> Result<()> {
        self.sink.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Compression, Format, ManifestOptions};
    use crate::manifest::Manifest;
    use std::sync::Arc;

    fn test_manifest(dir: &std::path::Path) -> Arc<Manifest> {
        let options = ManifestOptions {
            batch_size: 1000,
            rotate_bytes: None,
            single_file: false,
            parquet_row_group: 10_000,
            parquet_rotate_rows: None,
            write_chunk_bytes: 8 * 1024 * 1024,
            compression_level: 0,
        };
        Arc::new(Manifest::create(
            dir.join("snap.manifest.json"),
            "widgets",
            Format::Csv,
            Compression::None,
            "digest".to_string(),
            options,
            "2024-01-01T00:00:00Z".to_string(),
        ))
    }

    fn new_writer(dir: &std::path::Path, rotate_bytes: Option<u64>) -> CsvWriter {
        let sink = PartSink::new(
            dir.to_path_buf(),
            "snap".to_string(),
            "csv",
            Compression::None,
            0,
            rotate_bytes,
            false,
            test_manifest(dir),
            0,
            false,
        );
        CsvWriter::new(sink)
    }

    #[test]
    fn header_row_follows_inferred_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = new_writer(dir.path(), None);

        let docs = vec![bson::doc! { "b": 1, "_id": 1, "a": "x" }];
        writer.write_many(Batch::Documents(docs)).unwrap();
        writer.close().unwrap();

        let content = std::fs::read_to_string(dir.path().join("snap-part-000000.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "_id,a,b");
        assert_eq!(lines.next().unwrap(), "1,x,1");
    }

    #[test]
    fn nested_document_values_embed_as_json_and_get_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = new_writer(dir.path(), None);

        let docs = vec![bson::doc! { "_id": 1, "tags": { "x": 1, "y": 2 } }];
        writer.write_many(Batch::Documents(docs)).unwrap();
        writer.close().unwrap();

        let content = std::fs::read_to_string(dir.path().join("snap-part-000000.csv")).unwrap();
        let data_line = content.lines().nth(1).unwrap();
        assert!(data_line.contains("\"{\"\"x\"\":1,\"\"y\"\":2}\""));
    }

    #[test]
    fn header_is_emitted_again_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = new_writer(dir.path(), Some(1));

        writer
            .write_many(Batch::Documents(vec![bson::doc! { "_id": 1, "v": "a" }]))
            .unwrap();
        writer
            .write_many(Batch::Documents(vec![bson::doc! { "_id": 2, "v": "b" }]))
            .unwrap();
        writer.close().unwrap();

        let part0 = std::fs::read_to_string(dir.path().join("snap-part-000000.csv")).unwrap();
        let part1 = std::fs::read_to_string(dir.path().join("snap-part-000001.csv")).unwrap();
        assert_eq!(part0.lines().next().unwrap(), "_id,v");
        assert_eq!(part1.lines().next().unwrap(), "_id,v");
    }
}
