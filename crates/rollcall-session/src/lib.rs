// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod aggregate;

pub use aggregate::{BlockFetch, fetch_block, fetch_blocks};

use rollcall_app::{
    BatchReceipt, BlockId, FetchRequest, HierarchyLayout, HierarchyStore, LeafIdentity,
    LeafRecord, Level, LineId, SessionCommand, SessionError, SessionEvent, SessionState, Status,
    UnitId,
};

/// Callbacks fired as session state changes. Every method defaults to a
/// no-op so presentation layers implement only what they render.
pub trait SessionObserver {
    fn on_unit_selected(&mut self, _unit: Option<&UnitId>) {}
    fn on_line_selected(&mut self, _line: Option<&LineId>) {}
    fn on_blocks_selected(&mut self, _blocks: &[BlockId]) {}
    fn on_leaves_loaded(&mut self, _block: &BlockId, _leaves: &[LeafRecord]) {}
    fn on_selection_changed(&mut self, _selected: usize) {}
    fn on_mutation_complete(&mut self, _updated: usize, _status: Status) {}
    fn on_failure(&mut self, _error: &SessionError) {}
    fn on_status(&mut self, _message: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Per-block outcome of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub loaded: Vec<BlockId>,
    pub failed: Vec<(BlockId, SessionError)>,
}

impl AggregateReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, events: &[SessionEvent]) {
        for event in events {
            match event {
                SessionEvent::BlockLoaded { block, .. } => self.loaded.push(block.clone()),
                SessionEvent::BlockFailed { block, error } => {
                    self.failed.push((block.clone(), error.clone()));
                }
                _ => {}
            }
        }
    }
}

/// Drives a [`SessionState`] against a store: runs the fetches and the
/// batch write each transition asks for, feeds the results back through
/// their tokens, and reports every resulting event to the observer.
pub struct Session<S, O = NoopObserver> {
    store: S,
    state: SessionState,
    observer: O,
}

impl<S> Session<S, NoopObserver>
where
    S: HierarchyStore + Sync,
{
    pub fn without_observer(store: S, layout: HierarchyLayout) -> Self {
        Self::new(store, layout, NoopObserver)
    }
}

impl<S, O> Session<S, O>
where
    S: HierarchyStore + Sync,
    O: SessionObserver,
{
    pub fn new(store: S, layout: HierarchyLayout, observer: O) -> Self {
        Self {
            store,
            state: SessionState::new(layout),
            observer,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn load_units(&mut self) -> Result<Vec<UnitId>, SessionError> {
        let request = self.state.begin_units_fetch();
        let result = self.list_ids(&request).map(|ids| ids.into_iter().map(UnitId::from).collect());
        let events = self.apply(SessionCommand::UnitsLoaded {
            token: request.token,
            result,
        });
        level_outcome(&events)?;
        Ok(self.state.units.items().to_vec())
    }

    /// Selects `unit` and loads its lines. Clearing the unit loads nothing.
    pub fn select_unit(&mut self, unit: Option<UnitId>) -> Result<Vec<LineId>, SessionError> {
        self.apply(SessionCommand::SelectUnit(unit));
        self.load_lines()
    }

    pub fn load_lines(&mut self) -> Result<Vec<LineId>, SessionError> {
        let Some(request) = self.state.begin_lines_fetch() else {
            return Ok(Vec::new());
        };
        let result = self.list_ids(&request).map(|ids| ids.into_iter().map(LineId::from).collect());
        let events = self.apply(SessionCommand::LinesLoaded {
            token: request.token,
            result,
        });
        level_outcome(&events)?;
        Ok(self.state.lines.items().to_vec())
    }

    /// Selects `line` under the current unit and loads its blocks.
    pub fn select_line(&mut self, line: Option<LineId>) -> Result<Vec<BlockId>, SessionError> {
        self.apply(SessionCommand::SelectLine(line));
        self.load_blocks()
    }

    pub fn load_blocks(&mut self) -> Result<Vec<BlockId>, SessionError> {
        let Some(request) = self.state.begin_blocks_fetch() else {
            return Ok(Vec::new());
        };
        let result = self
            .list_ids(&request)
            .map(|ids| ids.into_iter().map(BlockId::from).collect());
        let events = self.apply(SessionCommand::BlocksLoaded {
            token: request.token,
            result,
        });
        level_outcome(&events)?;
        Ok(self.state.blocks.items().to_vec())
    }

    pub fn set_blocks(&mut self, blocks: Vec<BlockId>) -> AggregateReport {
        self.change_blocks(SessionCommand::SetBlocks(blocks))
    }

    pub fn add_block(&mut self, block: BlockId) -> AggregateReport {
        self.change_blocks(SessionCommand::AddBlock(block))
    }

    pub fn remove_block(&mut self, block: BlockId) -> AggregateReport {
        self.change_blocks(SessionCommand::RemoveBlock(block))
    }

    /// Aggregates every listed block of the current line.
    pub fn select_all_blocks(&mut self) -> AggregateReport {
        self.change_blocks(SessionCommand::SelectAllBlocks)
    }

    /// Re-fetches the selected blocks, or only those in `only`.
    pub fn reload_blocks(&mut self, only: Option<&[BlockId]>) -> AggregateReport {
        let requests = self.state.begin_leaf_fetches(only);
        let mut report = AggregateReport::default();
        let Self {
            store,
            state,
            observer,
        } = self;

        fetch_blocks(&*store, &requests, |fetch| {
            if let Err(detail) = &fetch.result {
                log::warn!(
                    "event=leaf_fetch module=session status=error block={} detail={detail:?}",
                    fetch.block
                );
            }
            let events = state.dispatch(SessionCommand::LeavesLoaded {
                token: fetch.token,
                block: fetch.block,
                result: fetch.result,
            });
            notify(state, observer, &events);
            report.record(&events);
        });

        log::info!(
            "event=aggregate module=session status=done loaded={} failed={}",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// Re-runs the failed fetch at `level`. For leaves this re-fetches only
    /// the blocks whose last fetch failed.
    pub fn retry(&mut self, level: Level) -> Result<(), SessionError> {
        match level {
            Level::Unit => self.load_units().map(drop),
            Level::Line => self.load_lines().map(drop),
            Level::Block => self.load_blocks().map(drop),
            Level::Leaf => {
                let failed: Vec<BlockId> = self
                    .state
                    .block_slots
                    .iter()
                    .filter(|slot| slot.error.is_some())
                    .map(|slot| slot.block.clone())
                    .collect();
                if failed.is_empty() {
                    return Ok(());
                }
                let report = self.reload_blocks(Some(failed.as_slice()));
                match report.failed.into_iter().next() {
                    Some((_, error)) => Err(error),
                    None => Ok(()),
                }
            }
        }
    }

    /// Returns how many leaves the filter leaves visible.
    pub fn set_filter(&mut self, term: &str) -> usize {
        self.apply(SessionCommand::SetFilter(term.to_owned()));
        self.state.visible_leaves().len()
    }

    /// Returns whether `identity` is selected afterwards.
    pub fn toggle(&mut self, identity: LeafIdentity) -> bool {
        self.apply(SessionCommand::ToggleLeaf(identity.clone()));
        self.state.selection.contains(&identity)
    }

    /// Returns the selection size afterwards.
    pub fn toggle_all_visible(&mut self) -> usize {
        self.apply(SessionCommand::ToggleAllVisible);
        self.state.selection.len()
    }

    pub fn clear_selection(&mut self) {
        self.apply(SessionCommand::ClearSelection);
    }

    pub fn set_target_status(&mut self, status: Status) {
        self.apply(SessionCommand::SetTargetStatus(status));
    }

    /// Commits the target status to every selected leaf in one batch, then
    /// re-fetches the blocks it touched. Nothing is retried automatically.
    pub fn apply_status(&mut self) -> Result<BatchReceipt, SessionError> {
        let plan = match self.state.begin_mutation() {
            Ok(plan) => plan,
            Err(error) => {
                log::warn!("event=mutation module=session status=rejected reason={error:?}");
                self.observer.on_failure(&error);
                if let Some(message) = &self.state.status_line {
                    self.observer.on_status(message);
                }
                return Err(error);
            }
        };

        log::info!(
            "event=mutation module=session status=start writes={} leaves={} target={}",
            plan.ops.len(),
            plan.updated,
            plan.status.as_str()
        );
        let outcome = self
            .store
            .batch_update(&plan.ops)
            .map_err(|error| format!("{error:#}"));
        let events = self.apply(SessionCommand::MutationFinished {
            token: plan.token,
            result: outcome.clone(),
        });

        match outcome {
            Ok(receipt) => {
                log::info!(
                    "event=mutation module=session status=ok writes={}",
                    receipt.writes
                );
                let reload: Vec<BlockId> = events
                    .iter()
                    .find_map(|event| match event {
                        SessionEvent::MutationCompleted { blocks, .. } => Some(blocks.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                if !reload.is_empty() {
                    self.reload_blocks(Some(reload.as_slice()));
                }
                Ok(receipt)
            }
            Err(detail) => {
                log::error!("event=mutation module=session status=error detail={detail:?}");
                Err(SessionError::Mutation(detail))
            }
        }
    }

    fn change_blocks(&mut self, command: SessionCommand) -> AggregateReport {
        let events = self.apply(command);
        let changed = events
            .iter()
            .any(|event| matches!(event, SessionEvent::BlocksSelected(_)));
        if !changed {
            return AggregateReport::default();
        }
        self.reload_blocks(None)
    }

    fn list_ids(&self, request: &FetchRequest) -> Result<Vec<String>, String> {
        match self.store.list_children(&request.collection) {
            Ok(children) => {
                log::debug!(
                    "event=level_fetch module=session status=ok level={} count={}",
                    request.level.as_str(),
                    children.len()
                );
                Ok(children.into_iter().map(|child| child.id).collect())
            }
            Err(error) => {
                log::warn!(
                    "event=level_fetch module=session status=error level={} collection={}",
                    request.level.as_str(),
                    request.collection
                );
                Err(format!("{error:#}"))
            }
        }
    }

    fn apply(&mut self, command: SessionCommand) -> Vec<SessionEvent> {
        let events = self.state.dispatch(command);
        notify(&self.state, &mut self.observer, &events);
        events
    }
}

fn notify<O: SessionObserver>(state: &SessionState, observer: &mut O, events: &[SessionEvent]) {
    for event in events {
        match event {
            SessionEvent::UnitSelected(unit) => observer.on_unit_selected(unit.as_ref()),
            SessionEvent::LineSelected(line) => observer.on_line_selected(line.as_ref()),
            SessionEvent::BlocksSelected(blocks) => observer.on_blocks_selected(blocks),
            SessionEvent::SelectionChanged { selected } => observer.on_selection_changed(*selected),
            SessionEvent::BlockLoaded { block, .. } => {
                let leaves = state.slot(block).map(|slot| slot.records()).unwrap_or_default();
                observer.on_leaves_loaded(block, leaves);
            }
            SessionEvent::LevelFailed { error, .. }
            | SessionEvent::BlockFailed { error, .. }
            | SessionEvent::MutationFailed(error)
            | SessionEvent::EntryUndecodable(error) => observer.on_failure(error),
            SessionEvent::MutationCompleted {
                updated, status, ..
            } => observer.on_mutation_complete(*updated, *status),
            SessionEvent::StatusUpdated(message) => observer.on_status(message),
            SessionEvent::StaleResultDiscarded { level, request_id } => {
                log::debug!(
                    "event=stale_result module=session status=discarded level={} request_id={request_id}",
                    level.as_str()
                );
            }
            SessionEvent::FilterChanged { .. }
            | SessionEvent::TargetStatusChanged(_)
            | SessionEvent::LevelLoaded { .. } => {}
        }
    }
}

fn level_outcome(events: &[SessionEvent]) -> Result<(), SessionError> {
    for event in events {
        if let SessionEvent::LevelFailed { error, .. } = event {
            return Err(error.clone());
        }
    }
    Ok(())
}
