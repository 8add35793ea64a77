// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use rollcall_app::{
    BatchReceipt, BlockId, ChildDocument, DocPath, Fields, HierarchyLayout, HierarchyStore,
    LeafIdentity, LeafRecord, LineId, SessionError, Status, UnitId, WriteOp,
};
use rollcall_db::Store;
use rollcall_session::{Session, SessionObserver};
use std::io::Write;

use crate::config::{BackendKind, Config};

/// The store a run talks to, picked from `[store].backend` or `--demo`.
pub enum Backend {
    Sqlite(Store),
    Firestore(rollcall_remote::Client),
}

impl Backend {
    pub fn open(config: &Config, demo: bool) -> Result<Self> {
        if demo {
            let store = Store::open_memory()?;
            store.bootstrap()?;
            store.seed_demo_data(&config.layout())?;
            return Ok(Self::Sqlite(store));
        }

        match config.backend()? {
            BackendKind::Sqlite => {
                let db_path = config.db_path()?;
                let store = Store::open(&db_path).with_context(|| {
                    format!(
                        "open database {} -- if this path is wrong, set [store].db_path or ROLLCALL_DB_PATH",
                        db_path.display()
                    )
                })?;
                store.bootstrap()?;
                Ok(Self::Sqlite(store))
            }
            BackendKind::Firestore => {
                let Some(project_id) = config.project_id() else {
                    bail!("firestore.project_id is required when store.backend = \"firestore\"");
                };
                let client = rollcall_remote::Client::new(
                    config.base_url(),
                    project_id,
                    config.database(),
                    config.timeout()?,
                )
                .context("invalid [firestore] config; fix base_url/project_id/database/timeout")?
                .with_api_key(config.api_key());
                Ok(Self::Firestore(client))
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Firestore(_) => "firestore",
        }
    }
}

impl HierarchyStore for Backend {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        match self {
            Self::Sqlite(store) => store.list_children(collection),
            Self::Firestore(client) => client.list_children(collection),
        }
    }

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>> {
        match self {
            Self::Sqlite(store) => store.get_record(path),
            Self::Firestore(client) => client.get_record(path),
        }
    }

    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        match self {
            Self::Sqlite(store) => store.batch_update(ops),
            Self::Firestore(client) => client.batch_update(ops),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockChoice {
    All,
    Listed(Vec<BlockId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Codes(Vec<String>),
    AllVisible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Units,
    Lines {
        unit: UnitId,
    },
    Blocks {
        unit: UnitId,
        line: LineId,
    },
    Leaves {
        unit: UnitId,
        line: LineId,
        blocks: BlockChoice,
        filter: Option<String>,
    },
    SetStatus {
        unit: UnitId,
        line: LineId,
        blocks: BlockChoice,
        filter: Option<String>,
        status: Status,
        targets: Targets,
    },
}

/// Collects failure messages for the caller to print after the command.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    pub warnings: Vec<String>,
}

impl SessionObserver for ConsoleObserver {
    fn on_leaves_loaded(&mut self, block: &BlockId, leaves: &[LeafRecord]) {
        log::debug!(
            "event=leaves_loaded module=cli status=ok block={block} count={}",
            leaves.len()
        );
    }

    fn on_failure(&mut self, error: &SessionError) {
        self.warnings.push(error.to_string());
    }

    fn on_mutation_complete(&mut self, updated: usize, status: Status) {
        log::info!(
            "event=mutation_complete module=cli status=ok updated={updated} target={}",
            status.as_str()
        );
    }
}

pub fn run_command<S, W>(
    store: S,
    layout: HierarchyLayout,
    command: &Command,
    out: &mut W,
) -> Result<Vec<String>>
where
    S: HierarchyStore + Sync,
    W: Write,
{
    let mut session = Session::new(store, layout, ConsoleObserver::default());

    match command {
        Command::Units => {
            for unit in session.load_units()? {
                writeln!(out, "{unit}")?;
            }
        }
        Command::Lines { unit } => {
            for line in open_unit(&mut session, unit)? {
                writeln!(out, "{line}")?;
            }
        }
        Command::Blocks { unit, line } => {
            open_unit(&mut session, unit)?;
            for block in open_line(&mut session, line)? {
                writeln!(out, "{block}")?;
            }
        }
        Command::Leaves {
            unit,
            line,
            blocks,
            filter,
        } => {
            open_unit(&mut session, unit)?;
            open_line(&mut session, line)?;
            aggregate(&mut session, blocks)?;
            if let Some(term) = filter {
                session.set_filter(term);
            }
            write_leaves(&session, out)?;
        }
        Command::SetStatus {
            unit,
            line,
            blocks,
            filter,
            status,
            targets,
        } => {
            open_unit(&mut session, unit)?;
            open_line(&mut session, line)?;
            let report = aggregate(&mut session, blocks)?;
            if let Some((block, error)) = report.failed.first() {
                bail!("block {block} did not load ({error}); fix it or narrow --block before updating");
            }
            if let Some(term) = filter {
                session.set_filter(term);
            }
            select_targets(&mut session, targets)?;
            session.set_target_status(*status);
            session.apply_status().map_err(|error| {
                if error.is_retriable() {
                    anyhow!("{error}; nothing was applied, re-run set-status to retry")
                } else {
                    anyhow!(error)
                }
            })?;
            if let Some(message) = &session.state().status_line {
                writeln!(out, "{message}")?;
            }
        }
    }

    Ok(std::mem::take(&mut session.observer_mut().warnings))
}

fn open_unit<S: HierarchyStore + Sync, O: SessionObserver>(
    session: &mut Session<S, O>,
    unit: &UnitId,
) -> Result<Vec<LineId>> {
    let units = session.load_units()?;
    if !units.contains(unit) {
        bail!("unit {unit} not found; run `rollcall units` to list them");
    }
    Ok(session.select_unit(Some(unit.clone()))?)
}

fn open_line<S: HierarchyStore + Sync, O: SessionObserver>(
    session: &mut Session<S, O>,
    line: &LineId,
) -> Result<Vec<BlockId>> {
    if !session.state().lines.items().contains(line) {
        let unit = session
            .state()
            .unit
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        bail!("line {line} not found under unit {unit}; run `rollcall lines {unit}`");
    }
    Ok(session.select_line(Some(line.clone()))?)
}

fn aggregate<S: HierarchyStore + Sync, O: SessionObserver>(
    session: &mut Session<S, O>,
    blocks: &BlockChoice,
) -> Result<rollcall_session::AggregateReport> {
    match blocks {
        BlockChoice::All => Ok(session.select_all_blocks()),
        BlockChoice::Listed(wanted) => {
            let known = session.state().blocks.items();
            if let Some(missing) = wanted.iter().find(|block| !known.contains(block)) {
                bail!("block {missing} not found on this line; run `rollcall blocks` to list them");
            }
            Ok(session.set_blocks(wanted.clone()))
        }
    }
}

fn select_targets<S: HierarchyStore + Sync, O: SessionObserver>(
    session: &mut Session<S, O>,
    targets: &Targets,
) -> Result<()> {
    match targets {
        Targets::AllVisible => {
            session.toggle_all_visible();
        }
        Targets::Codes(codes) => {
            let mut chosen: Vec<LeafIdentity> = Vec::new();
            for code in codes {
                // `block|id` names one contact even when ids repeat across blocks.
                let exact = LeafIdentity::parse(code);
                let matches: Vec<LeafIdentity> = session
                    .state()
                    .visible_leaves()
                    .into_iter()
                    .filter(|leaf| !leaf.is_placeholder())
                    .filter(|leaf| {
                        exact.as_ref() == Some(&leaf.identity)
                            || &leaf.code == code
                            || leaf.local_id().as_str() == code
                    })
                    .map(|leaf| leaf.identity.clone())
                    .collect();
                if matches.is_empty() {
                    bail!("code {code} does not match any selectable contact in view");
                }
                for identity in matches {
                    if !chosen.contains(&identity) {
                        chosen.push(identity);
                    }
                }
            }
            for identity in chosen {
                session.toggle(identity);
            }
        }
    }
    Ok(())
}

fn write_leaves<S, O, W>(session: &Session<S, O>, out: &mut W) -> Result<()>
where
    S: HierarchyStore + Sync,
    O: SessionObserver,
    W: Write,
{
    let state = session.state();
    writeln!(out, "BLOCK\tCODE\tNAME\tSTATUS")?;
    let visible = state.visible_leaves();
    for leaf in &visible {
        match &leaf.decode_error {
            Some(detail) => writeln!(
                out,
                "{}\t{}\t(undecodable: {detail})\t-",
                leaf.block(),
                leaf.code
            )?,
            None => writeln!(
                out,
                "{}\t{}\t{}\t{}",
                leaf.block(),
                leaf.code,
                leaf.display_name(),
                leaf.status.map_or("-", Status::as_str)
            )?,
        }
    }
    for slot in &state.block_slots {
        if let Some(error) = &slot.error {
            writeln!(out, "{}\t!\tload failed: {error}\t-", slot.block)?;
        }
    }
    writeln!(
        out,
        "{} of {} contact(s) shown",
        visible.len(),
        state.leaves().count()
    )?;
    Ok(())
}
