// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use rollcall_app::{
    BlockId, EntryEncoding, Fields, HierarchyLayout, LeafIdentity, LeafRecord, Level, LineId,
    MUTATION_PRECONDITION_MESSAGE, SessionError, Status, UnitId,
};
use rollcall_session::{Session, SessionObserver};
use rollcall_testkit::{ContactFaker, FakeContact, MemoryStore, StoreCall};
use serde_json::{Value, json};

const UNIT: &str = "AA";
const LINE: &str = "11999990000";

#[derive(Debug, Default)]
struct Recorder {
    units: Vec<Option<String>>,
    lines: Vec<Option<String>>,
    blocks: Vec<Vec<String>>,
    loaded: Vec<(String, usize)>,
    selection: Vec<usize>,
    completed: Vec<(usize, Status)>,
    failures: Vec<SessionError>,
    statuses: Vec<String>,
}

impl SessionObserver for Recorder {
    fn on_unit_selected(&mut self, unit: Option<&UnitId>) {
        self.units.push(unit.map(ToString::to_string));
    }

    fn on_line_selected(&mut self, line: Option<&LineId>) {
        self.lines.push(line.map(ToString::to_string));
    }

    fn on_blocks_selected(&mut self, blocks: &[BlockId]) {
        self.blocks
            .push(blocks.iter().map(ToString::to_string).collect());
    }

    fn on_leaves_loaded(&mut self, block: &BlockId, leaves: &[LeafRecord]) {
        self.loaded.push((block.to_string(), leaves.len()));
    }

    fn on_selection_changed(&mut self, selected: usize) {
        self.selection.push(selected);
    }

    fn on_mutation_complete(&mut self, updated: usize, status: Status) {
        self.completed.push((updated, status));
    }

    fn on_failure(&mut self, error: &SessionError) {
        self.failures.push(error.clone());
    }

    fn on_status(&mut self, message: &str) {
        self.statuses.push(message.to_owned());
    }
}

fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

fn contact(id: &str, fields: Value) -> FakeContact {
    FakeContact {
        local_id: id.to_owned(),
        fields: object(fields),
    }
}

fn leaf_path(block: &str, id: &str) -> String {
    format!("contatos/{UNIT}/celulares/{LINE}/blocos/{block}/contatos/{id}")
}

fn block_path(block: &str) -> String {
    format!("contatos/{UNIT}/celulares/{LINE}/blocos/{block}")
}

fn stored_status(store: &MemoryStore, path: &str) -> Option<Value> {
    store.document(path)?.get("STATUS").cloned()
}

/// B1 holds x1 (S), B2 holds y1 (A) and its own x1.
fn two_block_store() -> Result<MemoryStore> {
    let layout = HierarchyLayout::default();
    let store = MemoryStore::new();
    store.put_document_block(
        &layout,
        UNIT,
        LINE,
        "B1",
        &[contact(
            "x1",
            json!({"CÓDIGO": "AB-0001", "NOME": "Ana", "CELULAR": "11999000123", "STATUS": "S"}),
        )],
    )?;
    store.put_document_block(
        &layout,
        UNIT,
        LINE,
        "B2",
        &[
            contact(
                "y1",
                json!({"CÓDIGO": "CD-0002", "NOME": "Bruno", "CELULAR": "21988887777", "STATUS": "A"}),
            ),
            contact(
                "x1",
                json!({"CÓDIGO": "CD-0003", "NOME": "Carla", "CELULAR": "21977776666", "STATUS": "NR"}),
            ),
        ],
    )?;
    store.insert("contatos/BB/celulares/21900000000", json!({}))?;
    Ok(store)
}

fn open_line(store: MemoryStore) -> Result<Session<MemoryStore, Recorder>> {
    let mut session = Session::new(store, HierarchyLayout::default(), Recorder::default());
    session.load_units()?;
    session.select_unit(Some(UnitId::from(UNIT)))?;
    session.select_line(Some(LineId::from(LINE)))?;
    Ok(session)
}

fn b1_b2() -> Vec<BlockId> {
    vec![BlockId::from("B1"), BlockId::from("B2")]
}

#[test]
fn navigation_loads_each_level_and_notifies_the_observer() -> Result<()> {
    let mut session = Session::new(
        two_block_store()?,
        HierarchyLayout::default(),
        Recorder::default(),
    );

    let units = session.load_units()?;
    assert_eq!(units, vec![UnitId::from("AA"), UnitId::from("BB")]);
    let lines = session.select_unit(Some(UnitId::from(UNIT)))?;
    assert_eq!(lines, vec![LineId::from(LINE)]);
    let blocks = session.select_line(Some(LineId::from(LINE)))?;
    assert_eq!(blocks, b1_b2());

    let report = session.set_blocks(b1_b2());
    assert!(report.is_complete());
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(session.state().leaves().count(), 3);

    let observer = session.observer();
    assert_eq!(observer.units, vec![Some("AA".to_owned())]);
    assert_eq!(observer.lines, vec![Some(LINE.to_owned())]);
    assert_eq!(observer.blocks, vec![vec!["B1".to_owned(), "B2".to_owned()]]);
    let mut loaded = observer.loaded.clone();
    loaded.sort();
    assert_eq!(loaded, vec![("B1".to_owned(), 1), ("B2".to_owned(), 2)]);
    Ok(())
}

#[test]
fn bulk_update_across_blocks_rewrites_status_and_clears_selection() -> Result<()> {
    let mut session = open_line(two_block_store()?)?;
    session.set_blocks(b1_b2());

    assert!(session.toggle(LeafIdentity::new("B1", "x1")));
    assert!(session.toggle(LeafIdentity::new("B2", "y1")));
    session.set_target_status(Status::NotContacted);

    let receipt = session.apply_status()?;
    assert_eq!(receipt.writes, 2);

    let store = session.store();
    assert_eq!(stored_status(store, &leaf_path("B1", "x1")), Some(json!("NC")));
    assert_eq!(stored_status(store, &leaf_path("B2", "y1")), Some(json!("NC")));
    assert_eq!(stored_status(store, &leaf_path("B2", "x1")), Some(json!("NR")));

    let state = session.state();
    assert!(state.selection.is_empty());
    assert!(!state.is_busy());
    let reloaded = state
        .find_leaf(&LeafIdentity::new("B1", "x1"))
        .and_then(|leaf| leaf.status);
    assert_eq!(reloaded, Some(Status::NotContacted));

    let observer = session.observer();
    assert_eq!(observer.completed, vec![(2, Status::NotContacted)]);
    assert_eq!(observer.selection.last(), Some(&0));
    assert!(
        observer
            .statuses
            .iter()
            .any(|message| message == "2 contact(s) updated to status NC")
    );
    Ok(())
}

#[test]
fn failed_block_leaves_other_blocks_selectable_until_retried() -> Result<()> {
    let store = two_block_store()?;
    store.fail_path(&block_path("B2"), "deadline exceeded");
    let mut session = open_line(store)?;

    let report = session.set_blocks(b1_b2());
    assert_eq!(report.loaded, vec![BlockId::from("B1")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, BlockId::from("B2"));

    assert!(session.toggle(LeafIdentity::new("B1", "x1")));
    let slot = session
        .state()
        .slot(&BlockId::from("B2"))
        .map(|slot| slot.error.clone());
    assert!(matches!(slot, Some(Some(detail)) if detail.contains("deadline exceeded")));

    let error = session
        .retry(Level::Leaf)
        .expect_err("block is still failing");
    assert!(error.to_string().contains("retry"));

    session.store().heal_path(&block_path("B2"));
    session.retry(Level::Leaf)?;
    assert_eq!(session.state().leaves().count(), 3);
    assert!(
        session
            .state()
            .selection
            .contains(&LeafIdentity::new("B1", "x1"))
    );
    Ok(())
}

#[test]
fn rejected_commit_keeps_selection_and_leaf_data() -> Result<()> {
    let store = two_block_store()?;
    let mut session = open_line(store)?;
    session.set_blocks(b1_b2());
    session.toggle(LeafIdentity::new("B1", "x1"));
    session.set_target_status(Status::Refused);
    session.store().fail_commits("permission denied");

    let before = session.state().block_slots.clone();
    let error = session.apply_status().expect_err("commit is rejected");
    assert!(matches!(error, SessionError::Mutation(_)));
    assert!(error.to_string().contains("permission denied"));

    let state = session.state();
    assert_eq!(state.block_slots, before);
    assert!(state.selection.contains(&LeafIdentity::new("B1", "x1")));
    assert!(!state.is_busy());
    assert_eq!(
        stored_status(session.store(), &leaf_path("B1", "x1")),
        Some(json!("S"))
    );

    session.store().heal_commits();
    session.apply_status()?;
    assert_eq!(
        stored_status(session.store(), &leaf_path("B1", "x1")),
        Some(json!("X"))
    );
    Ok(())
}

#[test]
fn hidden_selection_still_takes_part_in_the_update() -> Result<()> {
    let mut session = open_line(two_block_store()?)?;
    session.set_blocks(b1_b2());
    session.toggle(LeafIdentity::new("B1", "x1"));
    session.toggle(LeafIdentity::new("B2", "y1"));

    let visible = session.set_filter("99000");
    assert_eq!(visible, 1);
    assert_eq!(session.state().selection.len(), 2);

    session.set_target_status(Status::Returned);
    let receipt = session.apply_status()?;
    assert_eq!(receipt.writes, 2);
    assert_eq!(
        stored_status(session.store(), &leaf_path("B2", "y1")),
        Some(json!("R"))
    );
    Ok(())
}

#[test]
fn toggle_all_visible_twice_restores_the_selection() -> Result<()> {
    let mut session = open_line(two_block_store()?)?;
    session.set_blocks(b1_b2());
    session.toggle(LeafIdentity::new("B2", "y1"));
    session.set_filter("ana");

    assert_eq!(session.toggle_all_visible(), 2);
    assert_eq!(session.toggle_all_visible(), 1);
    assert!(
        session
            .state()
            .selection
            .contains(&LeafIdentity::new("B2", "y1"))
    );
    Ok(())
}

#[test]
fn changing_unit_empties_every_descendant() -> Result<()> {
    let mut session = open_line(two_block_store()?)?;
    session.set_blocks(b1_b2());
    session.toggle(LeafIdentity::new("B1", "x1"));

    let lines = session.select_unit(Some(UnitId::from("BB")))?;
    assert_eq!(lines, vec![LineId::from("21900000000")]);

    let state = session.state();
    assert!(state.line.is_none());
    assert!(state.block_slots.is_empty());
    assert_eq!(state.leaves().count(), 0);
    assert!(state.selection.is_empty());
    assert_eq!(session.observer().selection.last(), Some(&0));
    Ok(())
}

#[test]
fn update_without_selection_never_reaches_the_store() -> Result<()> {
    let mut session = open_line(two_block_store()?)?;
    session.set_blocks(b1_b2());

    let error = session.apply_status().expect_err("empty selection");
    assert_eq!(error, SessionError::validation(MUTATION_PRECONDITION_MESSAGE));
    assert_eq!(session.store().commit_count(), 0);
    assert_eq!(session.observer().failures.last(), Some(&error));
    Ok(())
}

#[test]
fn map_block_keeps_entry_encoding_and_skips_placeholders() -> Result<()> {
    let layout = HierarchyLayout::default();
    let store = MemoryStore::new();
    store.insert(
        &block_path("M1"),
        json!({
            "codigos": {
                "c1": {"CÓDIGO": "MF-0001", "NOME": "Dora", "STATUS": "S"},
                "c2": "{\"CÓDIGO\":\"MF-0002\",\"NOME\":\"Enzo\",\"STATUS\":\"A\"}",
                "c3": 42
            },
            "label": "map block"
        }),
    )?;
    let mut session = Session::new(store, layout, Recorder::default());
    session.load_units()?;
    session.select_unit(Some(UnitId::from(UNIT)))?;
    session.select_line(Some(LineId::from(LINE)))?;

    let report = session.select_all_blocks();
    assert_eq!(report.loaded, vec![BlockId::from("M1")]);
    assert_eq!(session.state().leaves().count(), 3);
    assert!(
        session
            .observer()
            .failures
            .iter()
            .any(|error| matches!(error, SessionError::Decode { entry, .. } if entry == "M1|c3"))
    );

    assert!(!session.toggle(LeafIdentity::new("M1", "c3")));
    assert_eq!(session.toggle_all_visible(), 2);
    session.set_target_status(Status::NotContacted);
    let receipt = session.apply_status()?;
    assert_eq!(receipt.writes, 1);

    let Some(record) = session.store().document(&block_path("M1")) else {
        bail!("map block record should still exist");
    };
    assert_eq!(record["codigos"]["c1"]["STATUS"], json!("NC"));
    let Some(text) = record["codigos"]["c2"].as_str() else {
        bail!("text entry should stay text");
    };
    let decoded: Value = serde_json::from_str(text)?;
    assert_eq!(decoded["STATUS"], json!("NC"));
    assert_eq!(decoded["NOME"], json!("Enzo"));
    assert_eq!(record["codigos"]["c3"], json!(42));
    assert_eq!(record["label"], json!("map block"));
    Ok(())
}

#[test]
fn text_map_field_update_keeps_every_other_entry() -> Result<()> {
    let store = MemoryStore::new();
    let packed = json!({
        "c1": {"CÓDIGO": "A-1", "STATUS": "S"},
        "c2": {"CÓDIGO": "A-2", "STATUS": "A"},
        "c3": "{\"CÓDIGO\":\"A-3\",\"STATUS\":\"NR\"}"
    });
    store.insert(
        &block_path("M1"),
        json!({"codigos": packed.to_string(), "label": "packed block"}),
    )?;
    let mut session = open_line(store)?;

    let report = session.set_blocks(vec![BlockId::from("M1")]);
    assert!(report.is_complete());
    assert!(session.toggle(LeafIdentity::new("M1", "c1")));
    session.set_target_status(Status::NotContacted);
    let receipt = session.apply_status()?;
    assert_eq!(receipt.writes, 1);

    let Some(record) = session.store().document(&block_path("M1")) else {
        bail!("packed block record should still exist");
    };
    let Some(text) = record["codigos"].as_str() else {
        bail!("map field stored as text should stay text");
    };
    let entries: Value = serde_json::from_str(text)?;
    assert_eq!(entries["c1"], json!({"CÓDIGO": "A-1", "STATUS": "NC"}));
    assert_eq!(entries["c2"], json!({"CÓDIGO": "A-2", "STATUS": "A"}));
    assert_eq!(entries["c3"], packed["c3"]);
    assert_eq!(record["label"], json!("packed block"));

    assert_eq!(session.state().leaves().count(), 3);
    let c1 = session.state().find_leaf(&LeafIdentity::new("M1", "c1"));
    assert_eq!(c1.and_then(|leaf| leaf.status), Some(Status::NotContacted));
    assert!(session.state().selection.is_empty());
    Ok(())
}

#[test]
fn many_blocks_aggregate_concurrently_in_selection_order() -> Result<()> {
    let layout = HierarchyLayout::default();
    let store = MemoryStore::new();
    let mut faker = ContactFaker::new(17);
    let names: Vec<String> = (1..=8).map(|index| format!("B{index}")).collect();
    for name in &names {
        store.put_document_block(&layout, UNIT, LINE, name, &faker.contacts(3))?;
    }
    store.put_map_block(
        &layout,
        UNIT,
        LINE,
        "M9",
        &faker.contacts(2),
        EntryEncoding::Text,
    )?;

    let mut session = open_line(store)?;
    let mut wanted: Vec<BlockId> = names.iter().rev().map(|name| BlockId::from(name.as_str())).collect();
    wanted.push(BlockId::from("M9"));
    let report = session.set_blocks(wanted.clone());

    assert!(report.is_complete());
    assert_eq!(report.loaded.len(), 9);
    assert_eq!(session.state().selected_blocks(), wanted);
    assert_eq!(session.state().leaves().count(), 8 * 3 + 2);

    let listed = session
        .store()
        .calls()
        .iter()
        .filter(|call| matches!(call, StoreCall::ListChildren(path) if path.ends_with("/contatos")))
        .count();
    assert_eq!(listed, 8);
    Ok(())
}

#[test]
fn empty_root_is_a_retriable_unit_failure() -> Result<()> {
    let mut session = Session::new(
        MemoryStore::new(),
        HierarchyLayout::default(),
        Recorder::default(),
    );

    let error = session.load_units().expect_err("no units");
    assert!(matches!(error, SessionError::Fetch { level: Level::Unit, .. }));
    assert!(error.is_retriable());

    session.store().insert("contatos/AA", json!({}))?;
    session.retry(Level::Unit)?;
    assert_eq!(session.state().units.items(), &[UnitId::from("AA")]);
    Ok(())
}
