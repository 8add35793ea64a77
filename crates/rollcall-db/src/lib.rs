// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod validation;

use anyhow::{Context, Result, anyhow, bail};
use rollcall_app::{
    BatchReceipt, ChildDocument, DocPath, Fields, HierarchyLayout, HierarchyStore, WriteOp,
    apply_field_writes,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::validation::{decode_record, encode_record, row_key};

pub const APP_NAME: &str = "rollcall";

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[(
    "documents",
    &["path", "parent", "doc_id", "data", "created_at", "updated_at"],
)];

struct RequiredIndex {
    name: &'static str,
    create_sql: &'static str,
}

const REQUIRED_INDEXES: &[RequiredIndex] = &[RequiredIndex {
    name: "idx_documents_parent",
    create_sql: "CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents (parent, doc_id);",
}];

/// SQLite-backed document tree. Each row is one document addressed by its
/// slash-joined path; rows without data stand in for prefix-only parents.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn bootstrap(&self) -> Result<()> {
        let conn = self.conn();
        if has_user_tables(&conn)? {
            validate_schema(&conn)?;
        } else {
            conn.execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }

        ensure_required_indexes(&conn)?;
        Ok(())
    }

    /// Creates or replaces the document at `path`, registering every
    /// ancestor document as a prefix-only row when it does not exist yet.
    pub fn put_document(&self, path: &DocPath, fields: &Fields) -> Result<()> {
        if !path.is_document() {
            bail!("{path} is a collection path; documents need an even number of segments");
        }
        let now = now_rfc3339()?;
        let mut conn = self.conn();
        let tx = conn.transaction().context("begin document write")?;

        for ancestor in path.ancestor_documents() {
            let (key, parent, id) = row_parts(&ancestor);
            tx.execute(
                "
                INSERT OR IGNORE INTO documents (path, parent, doc_id, data, created_at, updated_at)
                VALUES (?, ?, ?, NULL, ?, ?)
                ",
                params![key, parent, id, now, now],
            )
            .with_context(|| format!("register parent document {ancestor}"))?;
        }

        let (key, parent, id) = row_parts(path);
        tx.execute(
            "
            INSERT INTO documents (path, parent, doc_id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (path) DO UPDATE SET
              data = excluded.data,
              updated_at = excluded.updated_at
            ",
            params![key, parent, id, encode_record(fields), now, now],
        )
        .with_context(|| format!("write document {path}"))?;

        tx.commit().context("commit document write")
    }

    /// Loads a small fixed tree covering both block shapes: document blocks
    /// under unit AA and a map-field block under unit BB with native, text,
    /// and malformed entries.
    pub fn seed_demo_data(&self, layout: &HierarchyLayout) -> Result<()> {
        let unit_aa = layout.units().child("AA");
        let line_aa = unit_aa.child(&layout.lines).child("11999990000");
        let blocks_aa = line_aa.child(&layout.blocks);

        let documents = [
            (
                blocks_aa.child("B1").child(&layout.leaves).child("x1"),
                json!({"CÓDIGO": "AB-0101", "NOME": "Ana", "NOME COMPLETO": "Ana Souza", "CELULAR": "11999000111", "STATUS": "S"}),
            ),
            (
                blocks_aa.child("B1").child(&layout.leaves).child("x2"),
                json!({"CÓDIGO": "AB-0102", "NOME": "Bruno", "CELULAR": "11999000222", "STATUS": "NC"}),
            ),
            (
                blocks_aa.child("B2").child(&layout.leaves).child("y1"),
                json!({"CÓDIGO": "AB-0201", "NOME COMPLETO": "Carla Lima", "CELULAR": "11988000333", "STATUS": "A"}),
            ),
            (
                blocks_aa.child("B2").child(&layout.leaves).child("x1"),
                json!({"CÓDIGO": "AB-0202", "NOME": "Davi", "STATUS": "R"}),
            ),
            (blocks_aa.child("B1"), json!({})),
            (blocks_aa.child("B2"), json!({})),
        ];
        for (path, data) in documents {
            self.put_document(&path, &object(data)?)?;
        }

        let map_block = layout
            .units()
            .child("BB")
            .child(&layout.lines)
            .child("21988887777")
            .child(&layout.blocks)
            .child("M1");
        let mut record = Fields::new();
        record.insert(
            layout.map_field.clone(),
            json!({
                "c1": {"CÓDIGO": "MN-0001", "NOME": "Elisa", "CELULAR": "21988001111", "STATUS": "S"},
                "c2": {"CÓDIGO": "MN-0002", "NOME COMPLETO": "Felipe Costa", "STATUS": "X"},
                "c3": "{\"CÓDIGO\":\"MN-0003\",\"NOME\":\"Gabriela\",\"STATUS\":\"NR\"}",
                "c4": 42
            }),
        );
        self.put_document(&map_block, &record)
    }

    pub fn document_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE data IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .context("count documents")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HierarchyStore for Store {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        let key = row_key(collection.segments());
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "
                SELECT doc_id, data
                FROM documents
                WHERE parent = ?
                ORDER BY doc_id ASC
                ",
            )
            .context("prepare child listing")?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .with_context(|| format!("list children of {collection}"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("collect children of {collection}"))?;

        let mut children = Vec::with_capacity(rows.len());
        for (id, data) in rows {
            let data = match data {
                Some(raw) => Some(
                    decode_record(&raw)
                        .with_context(|| format!("decode document {key}/{id}"))?,
                ),
                None => None,
            };
            children.push(ChildDocument { id, data });
        }
        log::debug!(
            "event=list_children module=db status=ok collection={collection} count={}",
            children.len()
        );
        Ok(children)
    }

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>> {
        let conn = self.conn();
        let raw = load_data(&conn, path)?;
        raw.map(|raw| decode_record(&raw).with_context(|| format!("decode document {path}")))
            .transpose()
    }

    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        let committed_at = OffsetDateTime::now_utc();
        let stamp = committed_at
            .format(&Rfc3339)
            .context("format commit timestamp")?;
        let mut conn = self.conn();
        let tx = conn.transaction().context("begin batch update")?;

        // Any error below drops `tx` and rolls the whole batch back.
        for op in ops {
            let Some(raw) = load_data(&tx, &op.path)? else {
                bail!("no document to update at {}", op.path);
            };
            let mut record =
                decode_record(&raw).with_context(|| format!("decode document {}", op.path))?;
            apply_field_writes(&mut record, &op.fields);
            tx.execute(
                "UPDATE documents SET data = ?, updated_at = ? WHERE path = ?",
                params![encode_record(&record), stamp, row_key(op.path.segments())],
            )
            .with_context(|| format!("update document {}", op.path))?;
        }

        tx.commit().context("commit batch update")?;
        log::info!(
            "event=batch_update module=db status=ok writes={}",
            ops.len()
        );
        Ok(BatchReceipt {
            writes: ops.len(),
            committed_at: Some(committed_at),
        })
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("ROLLCALL_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set ROLLCALL_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("rollcall.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn load_data(conn: &Connection, path: &DocPath) -> Result<Option<String>> {
    let data: Option<Option<String>> = conn
        .query_row(
            "SELECT data FROM documents WHERE path = ?",
            params![row_key(path.segments())],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("load document {path}"))?;
    Ok(data.flatten())
}

fn row_parts(path: &DocPath) -> (String, String, String) {
    let segments = path.segments();
    let parent = segments
        .split_last()
        .map(|(_, parent)| row_key(parent))
        .unwrap_or_default();
    (row_key(segments), parent, path.id().to_owned())
}

fn object(value: Value) -> Result<Fields> {
    match value {
        Value::Object(fields) => Ok(fields),
        other => bail!("expected a JSON object, got {other}"),
    }
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        let columns = table_columns(conn, table)?;
        if columns.is_empty() {
            bail!(
                "database is missing required table `{table}`; use a rollcall-compatible database or migrate first"
            );
        }

        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.contains(*column))
            .collect();

        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; run migration before launching",
                missing.join(", ")
            );
        }
    }

    Ok(())
}

fn ensure_required_indexes(conn: &Connection) -> Result<()> {
    for index in REQUIRED_INDEXES {
        conn.execute_batch(index.create_sql)
            .with_context(|| format!("ensure required index `{}`", index.name))?;
    }

    let existing_indexes = index_names(conn)?;
    let missing = REQUIRED_INDEXES
        .iter()
        .filter(|index| !existing_indexes.contains(index.name))
        .map(|index| index.name)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "database is missing required indexes: {}; run migration before launching",
            missing.join(", ")
        );
    }

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    let names = rows
        .collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))?;
    Ok(names)
}

fn index_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'index'
              AND name NOT LIKE 'sqlite_%'
            ORDER BY name ASC
            ",
        )
        .context("prepare index names query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query index names")?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("collect index names")
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}
