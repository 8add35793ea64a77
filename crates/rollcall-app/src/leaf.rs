// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde_json::Value;

use crate::{
    BlockId, BlockLeaves, BlockShape, CODE_FIELD, ChildDocument, EntryEncoding, FULL_NAME_FIELD,
    Fields, LINE_NUMBER_FIELD, LeafIdentity, LeafOrigin, LeafRecord, NAME_FIELD, STATUS_FIELD,
    Status,
};

/// Builds a leaf from one document of a block's leaf collection.
pub fn leaf_from_document(block: &BlockId, document: ChildDocument) -> LeafRecord {
    let fields = document.data.unwrap_or_default();
    build_leaf(block, &document.id, fields, LeafOrigin::Document)
}

pub fn leaves_from_documents(block: &BlockId, documents: Vec<ChildDocument>) -> BlockLeaves {
    BlockLeaves {
        shape: BlockShape::DocumentCollection,
        leaves: documents
            .into_iter()
            .map(|document| leaf_from_document(block, document))
            .collect(),
        packed: None,
    }
}

/// Decodes every entry of a block's map field. Entries that fail to decode
/// become placeholders; the rest of the block is unaffected.
pub fn leaves_from_map_field(block: &BlockId, field: &str, value: &Value) -> Result<BlockLeaves> {
    let (entries, packed) = match value {
        Value::Object(entries) => (entries.clone(), false),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(entries)) => (entries, true),
            _ => bail!("map field `{field}` on block {block} is text but not a JSON object"),
        },
        _ => bail!("map field `{field}` on block {block} is neither a map nor JSON text"),
    };

    let origin = |encoding: EntryEncoding| {
        if packed {
            LeafOrigin::PackedEntry(encoding)
        } else {
            LeafOrigin::MapEntry(encoding)
        }
    };
    let leaves = entries
        .iter()
        .map(|(local, entry)| match decode_entry(entry) {
            Ok((fields, encoding)) => build_leaf(block, local, fields, origin(encoding)),
            Err(detail) => placeholder(block, local, entry, detail, origin),
        })
        .collect();

    Ok(BlockLeaves {
        shape: BlockShape::MapField,
        leaves,
        packed: packed.then_some(entries),
    })
}

/// Re-encodes a leaf's fields for a map entry, keeping its original encoding.
pub fn encode_entry(fields: &Fields, encoding: EntryEncoding) -> Result<Value> {
    match encoding {
        EntryEncoding::Native => Ok(Value::Object(fields.clone())),
        EntryEncoding::Text => Ok(Value::String(serde_json::to_string(fields)?)),
    }
}

fn decode_entry(entry: &Value) -> std::result::Result<(Fields, EntryEncoding), String> {
    match entry {
        Value::Object(fields) => Ok((fields.clone(), EntryEncoding::Native)),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => Ok((fields, EntryEncoding::Text)),
            Ok(_) => Err("entry text is JSON but not an object".to_owned()),
            Err(error) => Err(format!("entry text is not valid JSON: {error}")),
        },
        other => Err(format!("entry is a {} instead of a record", value_kind(other))),
    }
}

fn build_leaf(block: &BlockId, local: &str, fields: Fields, origin: LeafOrigin) -> LeafRecord {
    let code = field_text(&fields, CODE_FIELD).unwrap_or_else(|| local.to_owned());
    LeafRecord {
        identity: LeafIdentity::new(block.clone(), local),
        code,
        full_name: field_text(&fields, FULL_NAME_FIELD),
        name: field_text(&fields, NAME_FIELD),
        line_number: field_text(&fields, LINE_NUMBER_FIELD),
        status: field_text(&fields, STATUS_FIELD).and_then(|raw| Status::parse(&raw)),
        origin,
        fields,
        decode_error: None,
    }
}

fn placeholder(
    block: &BlockId,
    local: &str,
    entry: &Value,
    detail: String,
    origin: impl Fn(EntryEncoding) -> LeafOrigin,
) -> LeafRecord {
    let encoding = if entry.is_string() {
        EntryEncoding::Text
    } else {
        EntryEncoding::Native
    };
    LeafRecord {
        identity: LeafIdentity::new(block.clone(), local),
        code: local.to_owned(),
        full_name: None,
        name: None,
        line_number: None,
        status: None,
        origin: origin(encoding),
        fields: Fields::new(),
        decode_error: Some(detail),
    }
}

/// Text form of a scalar field; blank strings count as absent.
pub fn field_text(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_entry, field_text, leaf_from_document, leaves_from_map_field};
    use crate::{
        BlockId, BlockShape, ChildDocument, EntryEncoding, Fields, LeafOrigin, MISSING_NAME,
        Status,
    };
    use anyhow::Result;
    use serde_json::{Value, json};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn document_leaf_reads_code_names_and_status() {
        let leaf = leaf_from_document(
            &BlockId::from("B1"),
            ChildDocument {
                id: "x1".to_owned(),
                data: Some(fields(json!({
                    "CÓDIGO": "C-100",
                    "NOME": "Ana",
                    "NOME COMPLETO": "Ana Souza",
                    "STATUS": "nr",
                    "CELULAR": 11999990000_i64,
                    "EXTRA": [1, 2]
                }))),
            },
        );

        assert_eq!(leaf.identity.to_string(), "B1|x1");
        assert_eq!(leaf.code, "C-100");
        assert_eq!(leaf.display_name(), "Ana Souza");
        assert_eq!(leaf.status, Some(Status::NotReturned));
        assert_eq!(leaf.line_number.as_deref(), Some("11999990000"));
        assert_eq!(leaf.fields.get("EXTRA"), Some(&json!([1, 2])));
        assert_eq!(leaf.origin, LeafOrigin::Document);
    }

    #[test]
    fn code_falls_back_to_local_id_and_name_to_placeholder_text() {
        let leaf = leaf_from_document(
            &BlockId::from("B1"),
            ChildDocument {
                id: "x9".to_owned(),
                data: None,
            },
        );
        assert_eq!(leaf.code, "x9");
        assert_eq!(leaf.display_name(), MISSING_NAME);
        assert_eq!(leaf.status, None);
    }

    #[test]
    fn unknown_status_is_absent_but_kept_in_fields() {
        let leaf = leaf_from_document(
            &BlockId::from("B1"),
            ChildDocument {
                id: "x1".to_owned(),
                data: Some(fields(json!({"STATUS": "PENDING"}))),
            },
        );
        assert_eq!(leaf.status, None);
        assert_eq!(leaf.fields.get("STATUS"), Some(&json!("PENDING")));
    }

    #[test]
    fn map_field_decodes_native_and_text_entries_and_isolates_failures() -> Result<()> {
        let value = json!({
            "a1": {"CÓDIGO": "A-1", "STATUS": "A"},
            "a2": "{\"CÓDIGO\":\"A-2\",\"NOME\":\"Bia\"}",
            "a3": "{not json",
            "a4": 42
        });

        let block = leaves_from_map_field(&BlockId::from("B7"), "codigos", &value)?;
        assert_eq!(block.shape, BlockShape::MapField);
        assert_eq!(block.leaves.len(), 4);
        assert_eq!(block.placeholder_count(), 2);

        let a1 = &block.leaves[0];
        assert_eq!(a1.code, "A-1");
        assert_eq!(a1.origin, LeafOrigin::MapEntry(EntryEncoding::Native));

        let a2 = &block.leaves[1];
        assert_eq!(a2.display_name(), "Bia");
        assert_eq!(a2.origin, LeafOrigin::MapEntry(EntryEncoding::Text));

        let a3 = &block.leaves[2];
        assert!(a3.is_placeholder());
        assert_eq!(a3.code, "a3");
        assert!(a3.decode_failure().is_some());

        assert!(block.leaves[3].is_placeholder());
        Ok(())
    }

    #[test]
    fn map_field_stored_as_text_keeps_its_entries_for_rewrites() -> Result<()> {
        let text = json!({"c1": {"CÓDIGO": "A-1"}, "c2": "{broken"}).to_string();
        let block = leaves_from_map_field(&BlockId::from("M1"), "codigos", &json!(text))?;

        assert_eq!(
            block.leaves[0].origin,
            LeafOrigin::PackedEntry(EntryEncoding::Native)
        );
        assert!(block.leaves[1].is_placeholder());
        assert_eq!(
            block.packed.as_ref().and_then(|entries| entries.get("c2")),
            Some(&json!("{broken"))
        );

        let native = leaves_from_map_field(&BlockId::from("M1"), "codigos", &json!({}))?;
        assert_eq!(native.packed, None);
        Ok(())
    }

    #[test]
    fn map_field_of_wrong_kind_fails_the_block() {
        let error = leaves_from_map_field(&BlockId::from("B7"), "codigos", &json!([1]))
            .expect_err("list is not a map field");
        assert!(error.to_string().contains("neither a map nor JSON text"));
    }

    #[test]
    fn text_entries_re_encode_as_text() -> Result<()> {
        let record = fields(json!({"STATUS": "NC"}));
        assert_eq!(
            encode_entry(&record, EntryEncoding::Text)?,
            json!("{\"STATUS\":\"NC\"}")
        );
        assert_eq!(
            encode_entry(&record, EntryEncoding::Native)?,
            json!({"STATUS": "NC"})
        );
        Ok(())
    }

    #[test]
    fn blank_text_fields_count_as_missing() {
        let record = fields(json!({"NOME": "   ", "CELULAR": 5}));
        assert_eq!(field_text(&record, "NOME"), None);
        assert_eq!(field_text(&record, "CELULAR").as_deref(), Some("5"));
    }
}
