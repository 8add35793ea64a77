// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::collections::HashMap;

use crate::{
    BlockId, DocPath, EntryEncoding, FieldPath, Fields, HierarchyLayout, LeafOrigin, LeafRecord,
    LineId, STATUS_FIELD, Status, UnitId, WriteOp, encode_entry,
};

/// Builds the status writes for `leaves`, one op per touched record.
/// Leaves sharing a block record merge into that record's op; op order
/// follows the first leaf that touched each record.
///
/// `packed` holds the decoded map field of every block that stores it as
/// one JSON text. Such a field is rewritten whole, with only the selected
/// entries' status changed.
pub fn plan_status_writes(
    layout: &HierarchyLayout,
    unit: &UnitId,
    line: &LineId,
    status: Status,
    leaves: &[&LeafRecord],
    packed: &HashMap<BlockId, &Fields>,
) -> Result<Vec<WriteOp>> {
    let mut ops: Vec<WriteOp> = Vec::new();
    let mut index: HashMap<DocPath, usize> = HashMap::new();
    let mut rewritten: Vec<(BlockId, Fields)> = Vec::new();

    for leaf in leaves {
        if let Some(detail) = &leaf.decode_error {
            bail!("contact {} cannot be updated: {detail}", leaf.identity);
        }
        if let LeafOrigin::PackedEntry(encoding) = leaf.origin {
            let block = leaf.block();
            let position = match rewritten.iter().position(|(owner, _)| owner == block) {
                Some(position) => position,
                None => {
                    let Some(entries) = packed.get(block) else {
                        bail!("block {block} is not loaded -- reload it before updating");
                    };
                    rewritten.push((block.clone(), (*entries).clone()));
                    rewritten.len() - 1
                }
            };
            let mut fields = leaf.fields.clone();
            fields.insert(STATUS_FIELD.to_owned(), status_value(status));
            rewritten[position]
                .1
                .insert(leaf.local_id().to_string(), encode_entry(&fields, encoding)?);
            continue;
        }
        let (path, field, value) = status_write(layout, unit, line, status, leaf)?;
        push_write(&mut ops, &mut index, path, field, value);
    }

    for (block, entries) in rewritten {
        let text = serde_json::to_string(&entries)
            .with_context(|| format!("re-encode map field of block {block}"))?;
        push_write(
            &mut ops,
            &mut index,
            layout.block_record(unit, line, &block),
            FieldPath::single(&layout.map_field),
            Value::String(text),
        );
    }

    Ok(ops)
}

fn push_write(
    ops: &mut Vec<WriteOp>,
    index: &mut HashMap<DocPath, usize>,
    path: DocPath,
    field: FieldPath,
    value: Value,
) {
    let slot = *index.entry(path.clone()).or_insert_with(|| {
        ops.push(WriteOp::new(path));
        ops.len() - 1
    });
    ops[slot].fields.insert(field, value);
}

fn status_value(status: Status) -> Value {
    Value::String(status.as_str().to_owned())
}

/// Blocks touched by `leaves`, sorted and deduplicated.
pub fn affected_blocks(leaves: &[&LeafRecord]) -> Vec<BlockId> {
    let mut blocks: Vec<BlockId> = leaves.iter().map(|leaf| leaf.block().clone()).collect();
    blocks.sort();
    blocks.dedup();
    blocks
}

fn status_write(
    layout: &HierarchyLayout,
    unit: &UnitId,
    line: &LineId,
    status: Status,
    leaf: &LeafRecord,
) -> Result<(DocPath, FieldPath, Value)> {
    let code = status_value(status);
    match leaf.origin {
        LeafOrigin::Document => Ok((
            layout.leaf_record(unit, line, leaf.block(), leaf.local_id()),
            FieldPath::single(STATUS_FIELD),
            code,
        )),
        LeafOrigin::MapEntry(EntryEncoding::Native) => Ok((
            layout.block_record(unit, line, leaf.block()),
            FieldPath::new([
                layout.map_field.as_str(),
                leaf.local_id().as_str(),
                STATUS_FIELD,
            ]),
            code,
        )),
        LeafOrigin::MapEntry(EntryEncoding::Text) => {
            let mut fields = leaf.fields.clone();
            fields.insert(STATUS_FIELD.to_owned(), code);
            Ok((
                layout.block_record(unit, line, leaf.block()),
                FieldPath::new([layout.map_field.as_str(), leaf.local_id().as_str()]),
                encode_entry(&fields, EntryEncoding::Text)?,
            ))
        }
        LeafOrigin::PackedEntry(_) => {
            bail!("contact {} lives in a text map field and is rewritten whole", leaf.identity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{affected_blocks, plan_status_writes};
    use crate::{
        BlockId, ChildDocument, FieldPath, Fields, HierarchyLayout, LeafRecord, LineId, Status,
        UnitId, leaf_from_document, leaves_from_map_field,
    };
    use anyhow::Result;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn object(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn doc_leaf(block: &str, id: &str) -> LeafRecord {
        leaf_from_document(
            &BlockId::from(block),
            ChildDocument {
                id: id.to_owned(),
                data: Some(object(json!({"STATUS": "S", "NOME": "Ana"}))),
            },
        )
    }

    #[test]
    fn document_leaves_get_one_op_each() -> Result<()> {
        let layout = HierarchyLayout::default();
        let x1 = doc_leaf("B1", "x1");
        let y1 = doc_leaf("B2", "y1");

        let ops = plan_status_writes(
            &layout,
            &UnitId::from("AA"),
            &LineId::from("11999990000"),
            Status::NotContacted,
            &[&x1, &y1],
            &HashMap::new(),
        )?;

        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[0].path.to_string(),
            "contatos/AA/celulares/11999990000/blocos/B1/contatos/x1"
        );
        assert_eq!(
            ops[0].fields.get(&FieldPath::single("STATUS")),
            Some(&json!("NC"))
        );
        assert_eq!(ops[0].fields.len(), 1);
        assert_eq!(
            ops[1].path.to_string(),
            "contatos/AA/celulares/11999990000/blocos/B2/contatos/y1"
        );
        Ok(())
    }

    #[test]
    fn map_entries_in_one_block_merge_into_one_op() -> Result<()> {
        let layout = HierarchyLayout::default();
        let block = leaves_from_map_field(
            &BlockId::from("B7"),
            "codigos",
            &json!({
                "c1": {"CÓDIGO": "C-1", "STATUS": "S"},
                "c2": "{\"CÓDIGO\":\"C-2\",\"STATUS\":\"A\",\"NOME\":\"Bia\"}"
            }),
        )?;
        let leaves: Vec<&LeafRecord> = block.leaves.iter().collect();

        let ops = plan_status_writes(
            &layout,
            &UnitId::from("AA"),
            &LineId::from("L1"),
            Status::Refused,
            &leaves,
            &HashMap::new(),
        )?;

        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.path.to_string(), "contatos/AA/celulares/L1/blocos/B7");
        assert_eq!(
            op.fields.get(&FieldPath::new(["codigos", "c1", "STATUS"])),
            Some(&json!("X"))
        );

        let Some(Value::String(text)) = op.fields.get(&FieldPath::new(["codigos", "c2"])) else {
            anyhow::bail!("text entry should be rewritten as text");
        };
        let decoded: Value = serde_json::from_str(text)?;
        assert_eq!(
            decoded,
            json!({"CÓDIGO": "C-2", "STATUS": "X", "NOME": "Bia"})
        );
        Ok(())
    }

    #[test]
    fn text_map_field_is_rewritten_whole_with_only_selected_status_changed() -> Result<()> {
        let layout = HierarchyLayout::default();
        let stored = json!({
            "c1": {"CÓDIGO": "A-1", "STATUS": "S"},
            "c2": {"CÓDIGO": "A-2", "STATUS": "A"},
            "c3": "{\"CÓDIGO\":\"A-3\",\"STATUS\":\"S\"}",
            "c4": 7
        });
        let block_id = BlockId::from("M1");
        let block = leaves_from_map_field(&block_id, "codigos", &json!(stored.to_string()))?;
        let Some(entries) = block.packed.as_ref() else {
            anyhow::bail!("text map field should keep its decoded entries");
        };
        let packed = HashMap::from([(block_id.clone(), entries)]);
        let selected: Vec<&LeafRecord> = block
            .leaves
            .iter()
            .filter(|leaf| ["c1", "c3"].contains(&leaf.local_id().as_str()))
            .collect();

        let ops = plan_status_writes(
            &layout,
            &UnitId::from("AA"),
            &LineId::from("L1"),
            Status::NotContacted,
            &selected,
            &packed,
        )?;

        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path.to_string(), "contatos/AA/celulares/L1/blocos/M1");
        assert_eq!(ops[0].fields.len(), 1);
        let Some(Value::String(text)) = ops[0].fields.get(&FieldPath::single("codigos")) else {
            anyhow::bail!("text map field should be written back as text");
        };
        let written: Value = serde_json::from_str(text)?;
        assert_eq!(
            written,
            json!({
                "c1": {"CÓDIGO": "A-1", "STATUS": "NC"},
                "c2": {"CÓDIGO": "A-2", "STATUS": "A"},
                "c3": "{\"CÓDIGO\":\"A-3\",\"STATUS\":\"NC\"}",
                "c4": 7
            })
        );

        let missing = plan_status_writes(
            &layout,
            &UnitId::from("AA"),
            &LineId::from("L1"),
            Status::NotContacted,
            &selected,
            &HashMap::new(),
        )
        .expect_err("text map field without its entries must not be written");
        assert!(missing.to_string().contains("reload it"));
        Ok(())
    }

    #[test]
    fn placeholders_are_rejected() -> Result<()> {
        let block = leaves_from_map_field(&BlockId::from("B1"), "codigos", &json!({"bad": 5}))?;
        let leaves: Vec<&LeafRecord> = block.leaves.iter().collect();

        let error = plan_status_writes(
            &HierarchyLayout::default(),
            &UnitId::from("AA"),
            &LineId::from("L1"),
            Status::Active,
            &leaves,
            &HashMap::new(),
        )
        .expect_err("placeholder must not be written");
        assert!(error.to_string().contains("B1|bad"));
        Ok(())
    }

    #[test]
    fn affected_blocks_are_unique_and_sorted() {
        let a = doc_leaf("B2", "y1");
        let b = doc_leaf("B1", "x1");
        let c = doc_leaf("B2", "y2");
        assert_eq!(
            affected_blocks(&[&a, &b, &c]),
            vec![BlockId::from("B1"), BlockId::from("B2")]
        );
    }
}
