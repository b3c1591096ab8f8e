//! A small `$date`/`$oid` extended-JSON preprocessing shim for `--query`
//! and `--projection` (spec §6). Not a full MongoDB extended-JSON parser --
//! just enough to let an operator write `{"_id": {"$oid": "..."}}` and
//! `{"createdAt": {"$date": "..."}}` the way they would against any other
//! MongoDB tool.

use bson::{oid::ObjectId, Bson, Document};

pub fn json_to_document(value: serde_json::Value) -> anyhow::Result<Document> {
    match json_to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => anyhow::bail!("expected a JSON object, found {other:?}"),
    }
}

fn json_to_bson(value: serde_json::Value) -> anyhow::Result<Bson> {
    Ok(match value {
        serde_json::Value::Null => Bson::Null,
        serde_json::Value::Bool(b) => Bson::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Bson::String(s),
        serde_json::Value::Array(items) => {
            Bson::Array(items.into_iter().map(json_to_bson).collect::<anyhow::Result<_>>()?)
        }
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(oid)) = map.get("$oid") {
                if map.len() == 1 {
                    return Ok(Bson::ObjectId(
                        ObjectId::parse_str(oid).map_err(|e| anyhow::anyhow!("invalid $oid: {e}"))?,
                    ));
                }
            }
            if let Some(serde_json::Value::String(date)) = map.get("$date") {
                if map.len() == 1 {
                    let dt = bson::DateTime::parse_rfc3339_str(date)
                        .map_err(|e| anyhow::anyhow!("invalid $date: {e}"))?;
                    return Ok(Bson::DateTime(dt));
                }
            }
            let mut doc = Document::new();
            for (key, value) in map {
                doc.insert(key, json_to_bson(value)?);
            }
            Bson::Document(doc)
        }
    })
}
