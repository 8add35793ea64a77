// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::{DocPath, FieldPath};

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ChildDocument {
    pub id: String,
    /// `None` when the child only exists as a prefix of deeper documents.
    pub data: Option<Fields>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub path: DocPath,
    pub fields: BTreeMap<FieldPath, Value>,
}

impl WriteOp {
    pub fn new(path: DocPath) -> Self {
        Self {
            path,
            fields: BTreeMap::new(),
        }
    }

    pub fn set(mut self, field: FieldPath, value: Value) -> Self {
        self.fields.insert(field, value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub writes: usize,
    pub committed_at: Option<OffsetDateTime>,
}

/// Key-path addressed document tree: the only seam to the backing store.
pub trait HierarchyStore {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>>;

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>>;

    /// Applies every op or none of them.
    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt>;
}

impl<T: HierarchyStore + ?Sized> HierarchyStore for &T {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        (**self).list_children(collection)
    }

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>> {
        (**self).get_record(path)
    }

    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        (**self).batch_update(ops)
    }
}

impl<T: HierarchyStore + ?Sized> HierarchyStore for Box<T> {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        (**self).list_children(collection)
    }

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>> {
        (**self).get_record(path)
    }

    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        (**self).batch_update(ops)
    }
}

/// Writes each field path into `record`, creating intermediate maps and
/// replacing non-map intermediates.
pub fn apply_field_writes(record: &mut Fields, fields: &BTreeMap<FieldPath, Value>) {
    for (path, value) in fields {
        set_field(record, path.segments(), value.clone());
    }
}

fn set_field(record: &mut Fields, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        record.insert(head.clone(), value);
        return;
    }

    let slot = record
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Fields::new()));
    if !slot.is_object() {
        *slot = Value::Object(Fields::new());
    }
    if let Value::Object(child) = slot {
        set_field(child, rest, value);
    }
}
