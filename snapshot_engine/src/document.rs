//! The dynamic document model the rest of the engine operates on.
//!
//! Per-spec, a document is an ordered mapping from string keys to
//! dynamically typed values, with a totally-ordered primary key under
//! `_id`. Rather than invent a parallel tagged-variant type, we operate
//! directly on [`bson::Document`] / [`bson::Bson`] -- the same types the
//! real `mongodb` driver cursor already hands back, so there is no
//! translation layer between "what the client returns" and "what the
//! engine processes".

use bson::{Bson, Document};

use crate::error::{ErrorKind, Result};

/// The primary key type used to order and bound partitions.
///
/// MongoDB's default `_id` is an [`bson::oid::ObjectId`], but the engine
/// tolerates any BSON-comparable value (per spec §3, `_id` just needs to
/// be totally ordered).
pub type Id = Bson;

/// Extracts the `_id` field from a document.
pub fn document_id(doc: &Document) -> Result<Id> {
    doc.get("_id").cloned().ok_or_else(|| {
        ErrorKind::Internal.with_message("document is missing an `_id` field")
    })
}

/// Renders a document to a single line of compact JSON, terminated by `\n`.
///
/// Uses BSON's own extended-JSON-ish `Display`/`serde_json` bridge:
/// `ObjectId` becomes its 24-character hex string, `DateTime` becomes an
/// RFC-3339 string, both matching spec §9's serialization rules.
pub fn to_jsonl_line(doc: &Document) -> Result<String> {
    let value = bson_document_to_json(doc);
    let mut line =
        serde_json::to_string(&value).map_err(|e| ErrorKind::Internal.with_source(e))?;
    line.push('\n');
    Ok(line)
}

/// Converts a BSON document into a `serde_json::Value` using the engine's
/// canonical (non-extended) JSON mapping: ObjectId -> hex string, DateTime
/// -> RFC-3339 string, Int64/Int32/Double map directly, Binary -> base64.
pub fn bson_document_to_json(doc: &Document) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(doc.len());
    for (key, value) in doc {
        map.insert(key.clone(), bson_to_json(value));
    }
    serde_json::Value::Object(map)
}

pub fn bson_to_json(value: &Bson) -> serde_json::Value {
    match value {
        Bson::Null => serde_json::Value::Null,
        Bson::Boolean(b) => serde_json::Value::Bool(*b),
        Bson::Int32(n) => serde_json::Value::from(*n),
        Bson::Int64(n) => serde_json::Value::from(*n),
        Bson::Double(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Bson::String(s) => serde_json::Value::String(s.clone()),
        Bson::Array(items) => serde_json::Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(d) => bson_document_to_json(d),
        Bson::ObjectId(oid) => serde_json::Value::String(oid.to_hex()),
        Bson::DateTime(dt) => serde_json::Value::String(dt.try_to_rfc3339_string().unwrap_or_default()),
        Bson::Binary(bin) => {
            use base64::{engine::general_purpose::STANDARD, Engine};
            serde_json::Value::String(STANDARD.encode(&bin.bytes))
        }
        Bson::Decimal128(d) => serde_json::Value::String(d.to_string()),
        Bson::Timestamp(ts) => serde_json::Value::String(format!("{}:{}", ts.time, ts.increment)),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// Flattens a value to a single CSV field, per spec §4.4.2: scalars render
/// as their natural text form, nested mappings/sequences round-trip as a
/// single embedded JSON string.
pub fn bson_to_csv_field(value: &Bson) -> String {
    match value {
        Bson::Null => String::new(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => dt.try_to_rfc3339_string().unwrap_or_default(),
        Bson::Array(_) | Bson::Document(_) => bson_to_json(value).to_string(),
        Bson::Binary(bin) => {
            use base64::{engine::general_purpose::STANDARD, Engine};
            STANDARD.encode(&bin.bytes)
        }
        other => other.to_string(),
    }
}
