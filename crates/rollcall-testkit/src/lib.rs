// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use rollcall_app::{
    BatchReceipt, BlockId, CODE_FIELD, ChildDocument, DocPath, EntryEncoding, FULL_NAME_FIELD,
    Fields, HierarchyLayout, HierarchyStore, LINE_NUMBER_FIELD, LineId, NAME_FIELD, STATUS_FIELD,
    Status, UnitId, WriteOp, apply_field_writes, encode_entry,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use time::macros::datetime;

const FIRST_NAMES: [&str; 16] = [
    "Ana", "Bruno", "Carla", "Davi", "Elisa", "Felipe", "Gabriela", "Heitor", "Isabela", "João",
    "Larissa", "Marcos", "Natália", "Otávio", "Paula", "Rafael",
];
const LAST_NAMES: [&str; 14] = [
    "Silva", "Souza", "Oliveira", "Santos", "Lima", "Pereira", "Ferreira", "Costa", "Rodrigues",
    "Almeida", "Nascimento", "Carvalho", "Gomes", "Ribeiro",
];
const CODE_PREFIXES: [&str; 8] = ["AB", "CD", "EF", "GH", "JK", "MN", "PQ", "RS"];
const AREA_CODES: [&str; 6] = ["11", "21", "31", "41", "51", "61"];

struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

/// One generated leaf: its local id and the record stored for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeContact {
    pub local_id: String,
    pub fields: Fields,
}

/// Seedable generator of contact records shaped like the production tree.
pub struct ContactFaker {
    rng: DeterministicRng,
    issued: usize,
}

impl ContactFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            issued: 0,
        }
    }

    pub fn contact(&mut self) -> FakeContact {
        self.issued += 1;
        let first = self.pick(&FIRST_NAMES);
        let last = self.pick(&LAST_NAMES);

        let mut fields = Fields::new();
        fields.insert(CODE_FIELD.to_owned(), Value::String(self.code()));
        fields.insert(NAME_FIELD.to_owned(), Value::String(first.to_owned()));
        if self.rng.bool() {
            fields.insert(
                FULL_NAME_FIELD.to_owned(),
                Value::String(format!("{first} {last}")),
            );
        }
        fields.insert(
            LINE_NUMBER_FIELD.to_owned(),
            Value::String(self.line_number()),
        );
        fields.insert(
            STATUS_FIELD.to_owned(),
            Value::String(self.status().as_str().to_owned()),
        );

        FakeContact {
            local_id: format!("c{:03}", self.issued),
            fields,
        }
    }

    pub fn contacts(&mut self, count: usize) -> Vec<FakeContact> {
        (0..count).map(|_| self.contact()).collect()
    }

    pub fn code(&mut self) -> String {
        let prefix = self.pick(&CODE_PREFIXES);
        format!("{prefix}-{:04}", self.rng.int_n(10_000))
    }

    pub fn line_number(&mut self) -> String {
        let area = self.pick(&AREA_CODES);
        format!("{area}9{:08}", self.rng.int_n(100_000_000))
    }

    pub fn status(&mut self) -> Status {
        Status::ALL[self.rng.int_n(Status::ALL.len())]
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    ListChildren(String),
    GetRecord(String),
    BatchUpdate(usize),
}

/// In-memory [`HierarchyStore`] with per-path failure injection and a log
/// of every call it served.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocPath, Fields>>,
    failures: Mutex<HashMap<String, String>>,
    commit_failure: Mutex<Option<String>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` (a JSON object) at the slash-separated document path.
    pub fn insert(&self, path: &str, data: Value) -> Result<()> {
        let path = DocPath::parse(path)?;
        if !path.is_document() {
            bail!("{path} is a collection path, not a document path");
        }
        let Value::Object(fields) = data else {
            bail!("document data for {path} must be a JSON object");
        };
        lock(&self.docs).insert(path, fields);
        Ok(())
    }

    /// Stores one document per contact under the block's leaf collection.
    pub fn put_document_block(
        &self,
        layout: &HierarchyLayout,
        unit: &str,
        line: &str,
        block: &str,
        contacts: &[FakeContact],
    ) -> Result<()> {
        let (unit, line, block) = ids(unit, line, block);
        let mut docs = lock(&self.docs);
        docs.entry(layout.block_record(&unit, &line, &block))
            .or_default();
        for contact in contacts {
            let path = layout
                .leaves(&unit, &line, &block)
                .child(&contact.local_id);
            docs.insert(path, contact.fields.clone());
        }
        Ok(())
    }

    /// Stores the contacts as entries of the block record's map field.
    pub fn put_map_block(
        &self,
        layout: &HierarchyLayout,
        unit: &str,
        line: &str,
        block: &str,
        contacts: &[FakeContact],
        encoding: EntryEncoding,
    ) -> Result<()> {
        let (unit, line, block) = ids(unit, line, block);
        let mut entries = Fields::new();
        for contact in contacts {
            entries.insert(
                contact.local_id.clone(),
                encode_entry(&contact.fields, encoding)?,
            );
        }
        let mut record = Fields::new();
        record.insert(layout.map_field.clone(), Value::Object(entries));
        lock(&self.docs).insert(layout.block_record(&unit, &line, &block), record);
        Ok(())
    }

    pub fn document(&self, path: &str) -> Option<Fields> {
        let path = DocPath::parse(path).ok()?;
        lock(&self.docs).get(&path).cloned()
    }

    /// Makes every list or get on `path` fail with `detail`.
    pub fn fail_path(&self, path: &str, detail: &str) {
        lock(&self.failures).insert(path.trim_matches('/').to_owned(), detail.to_owned());
    }

    pub fn heal_path(&self, path: &str) {
        lock(&self.failures).remove(path.trim_matches('/'));
    }

    pub fn fail_commits(&self, detail: &str) {
        *lock(&self.commit_failure) = Some(detail.to_owned());
    }

    pub fn heal_commits(&self) {
        *lock(&self.commit_failure) = None;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, StoreCall::BatchUpdate(_)))
            .count()
    }

    fn check_failure(&self, path: &DocPath) -> Result<()> {
        if let Some(detail) = lock(&self.failures).get(&path.to_string()) {
            bail!("{detail}");
        }
        Ok(())
    }
}

impl HierarchyStore for MemoryStore {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        lock(&self.calls).push(StoreCall::ListChildren(collection.to_string()));
        self.check_failure(collection)?;

        let depth = collection.segments().len();
        let mut children: BTreeMap<String, Option<Fields>> = BTreeMap::new();
        for (path, fields) in lock(&self.docs).iter() {
            let segments = path.segments();
            if segments.len() <= depth || !segments.starts_with(collection.segments()) {
                continue;
            }
            let id = segments[depth].clone();
            if segments.len() == depth + 1 {
                children.insert(id, Some(fields.clone()));
            } else {
                children.entry(id).or_insert(None);
            }
        }

        Ok(children
            .into_iter()
            .map(|(id, data)| ChildDocument { id, data })
            .collect())
    }

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>> {
        lock(&self.calls).push(StoreCall::GetRecord(path.to_string()));
        self.check_failure(path)?;
        Ok(lock(&self.docs).get(path).cloned())
    }

    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        lock(&self.calls).push(StoreCall::BatchUpdate(ops.len()));
        if let Some(detail) = lock(&self.commit_failure).as_ref() {
            bail!("{detail}");
        }

        let mut docs = lock(&self.docs);
        for op in ops {
            if !docs.contains_key(&op.path) {
                bail!("no document to update at {}", op.path);
            }
        }
        for op in ops {
            if let Some(record) = docs.get_mut(&op.path) {
                apply_field_writes(record, &op.fields);
            }
        }

        Ok(BatchReceipt {
            writes: ops.len(),
            committed_at: Some(fixture_datetime()),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ids(unit: &str, line: &str, block: &str) -> (UnitId, LineId, BlockId) {
    (UnitId::from(unit), LineId::from(line), BlockId::from(block))
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("rollcall.db");
    Ok((dir, db_path))
}

pub fn fixture_datetime() -> OffsetDateTime {
    datetime!(2026-02-19 12:34:56 UTC)
}

#[cfg(test)]
mod tests {
    use super::{ContactFaker, MemoryStore, StoreCall};
    use anyhow::Result;
    use rollcall_app::{
        CODE_FIELD, DocPath, EntryEncoding, FieldPath, HierarchyLayout, HierarchyStore,
        STATUS_FIELD, WriteOp, field_text,
    };
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn same_seed_same_contacts() {
        let mut left = ContactFaker::new(42);
        let mut right = ContactFaker::new(42);
        assert_eq!(left.contacts(5), right.contacts(5));
    }

    #[test]
    fn contacts_carry_code_line_and_status() {
        let mut faker = ContactFaker::new(7);
        for contact in faker.contacts(20) {
            assert!(field_text(&contact.fields, CODE_FIELD).is_some());
            assert!(field_text(&contact.fields, STATUS_FIELD).is_some());
            assert!(contact.local_id.starts_with('c'));
        }
    }

    #[test]
    fn variety_across_seeds() {
        let codes: BTreeSet<String> = (1..=10)
            .map(|seed| ContactFaker::new(seed).code())
            .collect();
        assert!(codes.len() > 5);
    }

    #[test]
    fn listing_reports_prefix_only_parents_as_missing() -> Result<()> {
        let store = MemoryStore::new();
        store.insert("contatos/AA/celulares/L1/blocos/B1", json!({}))?;

        let units = store.list_children(&DocPath::collection("contatos"))?;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, "AA");
        assert!(units[0].data.is_none());

        let blocks = store.list_children(&DocPath::parse("contatos/AA/celulares/L1/blocos")?)?;
        assert_eq!(blocks[0].data, Some(Default::default()));
        Ok(())
    }

    #[test]
    fn injected_failures_hit_only_their_path() -> Result<()> {
        let store = MemoryStore::new();
        store.insert("contatos/AA", json!({}))?;
        store.fail_path("contatos", "unavailable");

        let error = store
            .list_children(&DocPath::collection("contatos"))
            .expect_err("injected failure");
        assert_eq!(error.to_string(), "unavailable");
        assert!(store.get_record(&DocPath::parse("contatos/AA")?)?.is_some());

        store.heal_path("contatos");
        assert_eq!(store.list_children(&DocPath::collection("contatos"))?.len(), 1);
        Ok(())
    }

    #[test]
    fn batch_update_is_all_or_nothing() -> Result<()> {
        let store = MemoryStore::new();
        store.insert("c/a", json!({"STATUS": "S"}))?;
        let ops = [
            WriteOp::new(DocPath::parse("c/a")?).set(FieldPath::single("STATUS"), json!("A")),
            WriteOp::new(DocPath::parse("c/missing")?).set(FieldPath::single("STATUS"), json!("A")),
        ];

        store.batch_update(&ops).expect_err("missing document");

        assert_eq!(
            store.document("c/a").and_then(|doc| doc.get("STATUS").cloned()),
            Some(json!("S"))
        );
        assert_eq!(store.calls(), vec![StoreCall::BatchUpdate(2)]);
        Ok(())
    }

    #[test]
    fn map_blocks_keep_their_entry_encoding() -> Result<()> {
        let store = MemoryStore::new();
        let layout = HierarchyLayout::default();
        let contacts = ContactFaker::new(3).contacts(2);
        store.put_map_block(&layout, "AA", "L1", "B1", &contacts, EntryEncoding::Text)?;

        let record = store
            .document("contatos/AA/celulares/L1/blocos/B1")
            .unwrap_or_default();
        let entries = record
            .get("codigos")
            .and_then(|value| value.as_object())
            .cloned()
            .unwrap_or_default();
        assert_eq!(entries.len(), 2);
        assert!(entries.values().all(|entry| entry.is_string()));
        Ok(())
    }
}
