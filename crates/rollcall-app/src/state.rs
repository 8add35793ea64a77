// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::HashMap;

use crate::{
    BatchReceipt, BlockId, BlockLeaves, DocPath, Fields, HierarchyLayout, LeafIdentity, LeafRecord, Level,
    LineId, SelectionSet, SessionError, Status, ToggleAllOutcome, UnitId, WriteOp,
    affected_blocks, filter_leaves, plan_status_writes,
};

pub const EMPTY_ROOT_MESSAGE: &str = "no units found; the root collection is empty";
pub const MUTATION_BUSY_MESSAGE: &str = "a status update is already in flight";
pub const MUTATION_PRECONDITION_MESSAGE: &str =
    "select a unit, a line, and at least one contact to update";

/// Captured when a fetch starts. A result is applied only while the token
/// still matches the one recorded for its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    pub generation: u64,
    pub request_id: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LevelLoad<T> {
    #[default]
    Idle,
    Loading(RequestToken),
    Ready(Vec<T>),
    Failed(String),
}

impl<T> LevelLoad<T> {
    pub fn items(&self) -> &[T] {
        match self {
            Self::Ready(items) => items,
            _ => &[],
        }
    }

    pub fn pending(&self) -> Option<RequestToken> {
        match self {
            Self::Loading(token) => Some(*token),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }
}

/// Per-block accumulator entry. A failed reload keeps the last good leaves
/// next to the error.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSlot {
    pub block: BlockId,
    pub pending: Option<RequestToken>,
    pub leaves: Option<BlockLeaves>,
    pub error: Option<String>,
}

impl BlockSlot {
    fn new(block: BlockId) -> Self {
        Self {
            block,
            pending: None,
            leaves: None,
            error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn records(&self) -> &[LeafRecord] {
        self.leaves
            .as_ref()
            .map_or(&[] as &[LeafRecord], |loaded| loaded.leaves.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    InFlight {
        token: RequestToken,
        status: Status,
        updated: usize,
        blocks: Vec<BlockId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub token: RequestToken,
    pub level: Level,
    pub collection: DocPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafFetchRequest {
    pub token: RequestToken,
    pub block: BlockId,
    /// Block record, read for the map-field shape.
    pub record: DocPath,
    /// Leaf collection, listed for the document shape.
    pub leaves: DocPath,
    pub map_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub token: RequestToken,
    pub status: Status,
    pub ops: Vec<WriteOp>,
    pub updated: usize,
    pub blocks: Vec<BlockId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SelectUnit(Option<UnitId>),
    SelectLine(Option<LineId>),
    SetBlocks(Vec<BlockId>),
    AddBlock(BlockId),
    RemoveBlock(BlockId),
    SelectAllBlocks,
    SetFilter(String),
    ToggleLeaf(LeafIdentity),
    ToggleAllVisible,
    ClearSelection,
    SetTargetStatus(Status),
    UnitsLoaded {
        token: RequestToken,
        result: Result<Vec<UnitId>, String>,
    },
    LinesLoaded {
        token: RequestToken,
        result: Result<Vec<LineId>, String>,
    },
    BlocksLoaded {
        token: RequestToken,
        result: Result<Vec<BlockId>, String>,
    },
    LeavesLoaded {
        token: RequestToken,
        block: BlockId,
        result: Result<BlockLeaves, String>,
    },
    MutationFinished {
        token: RequestToken,
        result: Result<BatchReceipt, String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UnitSelected(Option<UnitId>),
    LineSelected(Option<LineId>),
    BlocksSelected(Vec<BlockId>),
    SelectionChanged { selected: usize },
    FilterChanged { visible: usize },
    TargetStatusChanged(Status),
    LevelLoaded { level: Level, count: usize },
    LevelFailed { level: Level, error: SessionError },
    BlockLoaded {
        block: BlockId,
        leaves: usize,
        placeholders: usize,
    },
    BlockFailed { block: BlockId, error: SessionError },
    EntryUndecodable(SessionError),
    StaleResultDiscarded { level: Level, request_id: u64 },
    MutationCompleted {
        updated: usize,
        status: Status,
        blocks: Vec<BlockId>,
    },
    MutationFailed(SessionError),
    StatusUpdated(String),
}

/// Navigation, aggregation, and selection state of one operator session.
/// Every transition goes through [`SessionState::dispatch`] or one of the
/// `begin_*` methods; none of them touch the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub layout: HierarchyLayout,
    pub units: LevelLoad<UnitId>,
    pub unit: Option<UnitId>,
    pub lines: LevelLoad<LineId>,
    pub line: Option<LineId>,
    pub blocks: LevelLoad<BlockId>,
    pub block_slots: Vec<BlockSlot>,
    pub selection: SelectionSet,
    pub filter: String,
    pub target_status: Status,
    pub mutation: MutationState,
    pub status_line: Option<String>,
    generation: u64,
    next_request_id: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(HierarchyLayout::default())
    }
}

impl SessionState {
    pub fn new(layout: HierarchyLayout) -> Self {
        Self {
            layout,
            units: LevelLoad::Idle,
            unit: None,
            lines: LevelLoad::Idle,
            line: None,
            blocks: LevelLoad::Idle,
            block_slots: Vec::new(),
            selection: SelectionSet::new(),
            filter: String::new(),
            target_status: Status::default(),
            mutation: MutationState::Idle,
            status_line: None,
            generation: 0,
            next_request_id: 0,
        }
    }

    /// Bumped whenever the unit or line changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.mutation, MutationState::InFlight { .. })
    }

    pub fn selected_blocks(&self) -> Vec<BlockId> {
        self.block_slots.iter().map(|slot| slot.block.clone()).collect()
    }

    pub fn slot(&self, block: &BlockId) -> Option<&BlockSlot> {
        self.block_slots.iter().find(|slot| &slot.block == block)
    }

    /// Flattened leaves of every loaded block, in block-set order.
    pub fn leaves(&self) -> impl Iterator<Item = &LeafRecord> {
        self.block_slots.iter().flat_map(BlockSlot::records)
    }

    pub fn visible_leaves(&self) -> Vec<&LeafRecord> {
        filter_leaves(self.leaves(), &self.filter)
    }

    pub fn find_leaf(&self, identity: &LeafIdentity) -> Option<&LeafRecord> {
        self.slot(&identity.block)?
            .records()
            .iter()
            .find(|leaf| &leaf.identity == identity)
    }

    pub fn dispatch(&mut self, command: SessionCommand) -> Vec<SessionEvent> {
        match command {
            SessionCommand::SelectUnit(unit) => self.select_unit(unit),
            SessionCommand::SelectLine(line) => self.select_line(line),
            SessionCommand::SetBlocks(blocks) => self.set_blocks(blocks),
            SessionCommand::AddBlock(block) => {
                if self.slot(&block).is_some() {
                    return Vec::new();
                }
                let mut blocks = self.selected_blocks();
                blocks.push(block);
                self.set_blocks(blocks)
            }
            SessionCommand::RemoveBlock(block) => {
                if self.slot(&block).is_none() {
                    return Vec::new();
                }
                let blocks = self
                    .selected_blocks()
                    .into_iter()
                    .filter(|candidate| candidate != &block)
                    .collect();
                self.set_blocks(blocks)
            }
            SessionCommand::SelectAllBlocks => match &self.blocks {
                LevelLoad::Ready(blocks) => {
                    let blocks = blocks.clone();
                    self.set_blocks(blocks)
                }
                _ => vec![self.set_status("blocks are not loaded yet")],
            },
            SessionCommand::SetFilter(term) => {
                self.filter = term;
                vec![SessionEvent::FilterChanged {
                    visible: self.visible_leaves().len(),
                }]
            }
            SessionCommand::ToggleLeaf(identity) => self.toggle_leaf(&identity),
            SessionCommand::ToggleAllVisible => self.toggle_all_visible(),
            SessionCommand::ClearSelection => {
                self.selection.clear();
                vec![SessionEvent::SelectionChanged { selected: 0 }]
            }
            SessionCommand::SetTargetStatus(status) => {
                self.target_status = status;
                vec![SessionEvent::TargetStatusChanged(status)]
            }
            SessionCommand::UnitsLoaded { token, result } => self.units_loaded(token, result),
            SessionCommand::LinesLoaded { token, result } => self.lines_loaded(token, result),
            SessionCommand::BlocksLoaded { token, result } => self.blocks_loaded(token, result),
            SessionCommand::LeavesLoaded {
                token,
                block,
                result,
            } => self.leaves_loaded(token, &block, result),
            SessionCommand::MutationFinished { token, result } => {
                self.mutation_finished(token, result)
            }
        }
    }

    pub fn begin_units_fetch(&mut self) -> FetchRequest {
        let token = self.next_token();
        self.units = LevelLoad::Loading(token);
        FetchRequest {
            token,
            level: Level::Unit,
            collection: self.layout.units(),
        }
    }

    /// `None` until a unit is selected.
    pub fn begin_lines_fetch(&mut self) -> Option<FetchRequest> {
        let collection = self.layout.lines(self.unit.as_ref()?);
        let token = self.next_token();
        self.lines = LevelLoad::Loading(token);
        Some(FetchRequest {
            token,
            level: Level::Line,
            collection,
        })
    }

    /// `None` until both a unit and a line are selected.
    pub fn begin_blocks_fetch(&mut self) -> Option<FetchRequest> {
        let collection = self
            .layout
            .blocks(self.unit.as_ref()?, self.line.as_ref()?);
        let token = self.next_token();
        self.blocks = LevelLoad::Loading(token);
        Some(FetchRequest {
            token,
            level: Level::Block,
            collection,
        })
    }

    /// Starts a fetch for every selected block, or only for those in `only`.
    /// Blocks keep their current leaves until the new result lands.
    pub fn begin_leaf_fetches(&mut self, only: Option<&[BlockId]>) -> Vec<LeafFetchRequest> {
        let (Some(unit), Some(line)) = (self.unit.clone(), self.line.clone()) else {
            return Vec::new();
        };

        let mut requests = Vec::new();
        for index in 0..self.block_slots.len() {
            let block = self.block_slots[index].block.clone();
            if only.is_some_and(|wanted| !wanted.contains(&block)) {
                continue;
            }
            let token = self.next_token();
            self.block_slots[index].pending = Some(token);
            requests.push(LeafFetchRequest {
                token,
                record: self.layout.block_record(&unit, &line, &block),
                leaves: self.layout.leaves(&unit, &line, &block),
                map_field: self.layout.map_field.clone(),
                block,
            });
        }
        requests
    }

    /// Validates the selection and plans the batch. On success the session is
    /// busy until the matching `MutationFinished` arrives.
    pub fn begin_mutation(&mut self) -> Result<MutationPlan, SessionError> {
        let plan = self.plan_mutation();
        match &plan {
            Ok(plan) => {
                self.mutation = MutationState::InFlight {
                    token: plan.token,
                    status: plan.status,
                    updated: plan.updated,
                    blocks: plan.blocks.clone(),
                };
            }
            Err(error) => {
                self.status_line = Some(error.to_string());
            }
        }
        plan
    }

    fn plan_mutation(&mut self) -> Result<MutationPlan, SessionError> {
        if self.is_busy() {
            return Err(SessionError::validation(MUTATION_BUSY_MESSAGE));
        }
        let (Some(unit), Some(line)) = (self.unit.clone(), self.line.clone()) else {
            return Err(SessionError::validation(MUTATION_PRECONDITION_MESSAGE));
        };
        if self.selection.is_empty() {
            return Err(SessionError::validation(MUTATION_PRECONDITION_MESSAGE));
        }

        let mut leaves = Vec::with_capacity(self.selection.len());
        for identity in self.selection.sorted() {
            let Some(leaf) = self.find_leaf(identity) else {
                return Err(SessionError::validation(format!(
                    "contact {identity} is not loaded -- reload block {} before updating",
                    identity.block
                )));
            };
            leaves.push(leaf);
        }

        let packed: HashMap<BlockId, &Fields> = self
            .block_slots
            .iter()
            .filter_map(|slot| {
                let entries = slot.leaves.as_ref()?.packed.as_ref()?;
                Some((slot.block.clone(), entries))
            })
            .collect();
        let status = self.target_status;
        let ops = plan_status_writes(&self.layout, &unit, &line, status, &leaves, &packed)
            .map_err(|error| SessionError::validation(format!("{error:#}")))?;
        let updated = leaves.len();
        let blocks = affected_blocks(&leaves);
        let token = self.next_token();

        Ok(MutationPlan {
            token,
            status,
            ops,
            updated,
            blocks,
        })
    }

    fn select_unit(&mut self, unit: Option<UnitId>) -> Vec<SessionEvent> {
        if unit == self.unit {
            return Vec::new();
        }
        self.unit = unit.clone();
        self.line = None;
        self.lines = LevelLoad::Idle;
        self.reset_line_scope();

        let mut events = vec![SessionEvent::UnitSelected(unit)];
        events.extend(self.clear_selection_for_navigation());
        events
    }

    fn select_line(&mut self, line: Option<LineId>) -> Vec<SessionEvent> {
        if line == self.line {
            return Vec::new();
        }
        if line.is_some() && self.unit.is_none() {
            return vec![self.set_status("select a unit before choosing a line")];
        }
        self.line = line.clone();
        self.reset_line_scope();

        let mut events = vec![SessionEvent::LineSelected(line)];
        events.extend(self.clear_selection_for_navigation());
        events
    }

    fn reset_line_scope(&mut self) {
        self.generation += 1;
        self.blocks = LevelLoad::Idle;
        self.block_slots.clear();
    }

    fn set_blocks(&mut self, blocks: Vec<BlockId>) -> Vec<SessionEvent> {
        if self.line.is_none() {
            return vec![self.set_status("select a line before choosing blocks")];
        }

        let mut unique: Vec<BlockId> = Vec::with_capacity(blocks.len());
        for block in blocks {
            if !unique.contains(&block) {
                unique.push(block);
            }
        }
        if unique == self.selected_blocks() {
            return Vec::new();
        }

        // Fresh slots carry no pending token, so results still in flight for
        // the previous block set are discarded on arrival.
        self.block_slots = unique.iter().cloned().map(BlockSlot::new).collect();

        let mut events = vec![SessionEvent::BlocksSelected(unique)];
        events.extend(self.clear_selection_for_navigation());
        events
    }

    fn clear_selection_for_navigation(&mut self) -> Option<SessionEvent> {
        if self.selection.is_empty() {
            return None;
        }
        self.selection.clear();
        Some(SessionEvent::SelectionChanged { selected: 0 })
    }

    fn toggle_leaf(&mut self, identity: &LeafIdentity) -> Vec<SessionEvent> {
        match self.find_leaf(identity).map(LeafRecord::is_placeholder) {
            None => {
                vec![self.set_status(&format!(
                    "contact {identity} is not loaded under the current selection"
                ))]
            }
            Some(true) => {
                vec![self.set_status(&format!(
                    "contact {identity} could not be decoded and cannot be selected"
                ))]
            }
            Some(false) => {
                self.selection.toggle(identity);
                vec![SessionEvent::SelectionChanged {
                    selected: self.selection.len(),
                }]
            }
        }
    }

    fn toggle_all_visible(&mut self) -> Vec<SessionEvent> {
        let visible: Vec<LeafIdentity> = self
            .visible_leaves()
            .into_iter()
            .filter(|leaf| !leaf.is_placeholder())
            .map(|leaf| leaf.identity.clone())
            .collect();
        match self.selection.toggle_all(&visible) {
            ToggleAllOutcome::Unchanged => Vec::new(),
            ToggleAllOutcome::Selected(_) | ToggleAllOutcome::Deselected(_) => {
                vec![SessionEvent::SelectionChanged {
                    selected: self.selection.len(),
                }]
            }
        }
    }

    fn units_loaded(
        &mut self,
        token: RequestToken,
        result: Result<Vec<UnitId>, String>,
    ) -> Vec<SessionEvent> {
        if self.units.pending() != Some(token) {
            return vec![stale(Level::Unit, token)];
        }
        match result {
            Ok(units) if units.is_empty() => {
                self.units = LevelLoad::Failed(EMPTY_ROOT_MESSAGE.to_owned());
                self.level_failed(Level::Unit, EMPTY_ROOT_MESSAGE.to_owned())
            }
            Ok(units) => {
                let count = units.len();
                self.units = LevelLoad::Ready(units);
                vec![SessionEvent::LevelLoaded {
                    level: Level::Unit,
                    count,
                }]
            }
            Err(detail) => {
                self.units = LevelLoad::Failed(detail.clone());
                self.level_failed(Level::Unit, detail)
            }
        }
    }

    fn lines_loaded(
        &mut self,
        token: RequestToken,
        result: Result<Vec<LineId>, String>,
    ) -> Vec<SessionEvent> {
        if !self.is_current(self.lines.pending(), token) {
            return vec![stale(Level::Line, token)];
        }
        match result {
            Ok(lines) => {
                let count = lines.len();
                self.lines = LevelLoad::Ready(lines);
                vec![SessionEvent::LevelLoaded {
                    level: Level::Line,
                    count,
                }]
            }
            Err(detail) => {
                self.lines = LevelLoad::Failed(detail.clone());
                self.level_failed(Level::Line, detail)
            }
        }
    }

    fn blocks_loaded(
        &mut self,
        token: RequestToken,
        result: Result<Vec<BlockId>, String>,
    ) -> Vec<SessionEvent> {
        if !self.is_current(self.blocks.pending(), token) {
            return vec![stale(Level::Block, token)];
        }
        match result {
            Ok(blocks) => {
                let count = blocks.len();
                self.blocks = LevelLoad::Ready(blocks);
                vec![SessionEvent::LevelLoaded {
                    level: Level::Block,
                    count,
                }]
            }
            Err(detail) => {
                self.blocks = LevelLoad::Failed(detail.clone());
                self.level_failed(Level::Block, detail)
            }
        }
    }

    fn leaves_loaded(
        &mut self,
        token: RequestToken,
        block: &BlockId,
        result: Result<BlockLeaves, String>,
    ) -> Vec<SessionEvent> {
        let generation = self.generation;
        let Some(index) = self.block_slots.iter().position(|slot| {
            &slot.block == block && slot.pending == Some(token) && token.generation == generation
        }) else {
            return vec![stale(Level::Leaf, token)];
        };
        self.block_slots[index].pending = None;

        match result {
            Ok(loaded) => {
                let mut events = vec![SessionEvent::BlockLoaded {
                    block: block.clone(),
                    leaves: loaded.leaves.len(),
                    placeholders: loaded.placeholder_count(),
                }];
                events.extend(
                    loaded
                        .leaves
                        .iter()
                        .filter_map(LeafRecord::decode_failure)
                        .map(SessionEvent::EntryUndecodable),
                );

                let dropped = self.selection.retain_in_block(block, |identity| {
                    loaded
                        .leaves
                        .iter()
                        .any(|leaf| &leaf.identity == identity && !leaf.is_placeholder())
                });
                if dropped > 0 {
                    events.push(SessionEvent::SelectionChanged {
                        selected: self.selection.len(),
                    });
                }

                let slot = &mut self.block_slots[index];
                slot.leaves = Some(loaded);
                slot.error = None;
                events
            }
            Err(detail) => {
                let error = SessionError::fetch(Level::Leaf, format!("block {block}: {detail}"));
                self.block_slots[index].error = Some(detail);
                vec![SessionEvent::BlockFailed {
                    block: block.clone(),
                    error,
                }]
            }
        }
    }

    fn mutation_finished(
        &mut self,
        token: RequestToken,
        result: Result<BatchReceipt, String>,
    ) -> Vec<SessionEvent> {
        let MutationState::InFlight {
            token: expected,
            status,
            updated,
            blocks,
        } = std::mem::take(&mut self.mutation)
        else {
            return vec![stale(Level::Leaf, token)];
        };
        if expected != token {
            self.mutation = MutationState::InFlight {
                token: expected,
                status,
                updated,
                blocks,
            };
            return vec![stale(Level::Leaf, token)];
        }

        match result {
            Ok(_) => {
                let message = format!("{updated} contact(s) updated to status {}", status.as_str());
                if token.generation != self.generation {
                    // The writes landed under a line the operator has left.
                    return vec![
                        SessionEvent::MutationCompleted {
                            updated,
                            status,
                            blocks: Vec::new(),
                        },
                        self.set_status(&message),
                    ];
                }
                let blocks = blocks
                    .into_iter()
                    .filter(|block| self.slot(block).is_some())
                    .collect();
                self.selection.clear();
                vec![
                    SessionEvent::MutationCompleted {
                        updated,
                        status,
                        blocks,
                    },
                    SessionEvent::SelectionChanged { selected: 0 },
                    self.set_status(&message),
                ]
            }
            Err(detail) => {
                let error = SessionError::Mutation(detail);
                let message = error.to_string();
                vec![SessionEvent::MutationFailed(error), self.set_status(&message)]
            }
        }
    }

    fn is_current(&self, pending: Option<RequestToken>, token: RequestToken) -> bool {
        pending == Some(token) && token.generation == self.generation
    }

    fn level_failed(&mut self, level: Level, detail: String) -> Vec<SessionEvent> {
        let error = SessionError::fetch(level, detail);
        let message = error.to_string();
        vec![
            SessionEvent::LevelFailed { level, error },
            self.set_status(&message),
        ]
    }

    fn next_token(&mut self) -> RequestToken {
        self.next_request_id += 1;
        RequestToken {
            generation: self.generation,
            request_id: self.next_request_id,
        }
    }

    fn set_status(&mut self, message: &str) -> SessionEvent {
        self.status_line = Some(message.to_owned());
        SessionEvent::StatusUpdated(message.to_owned())
    }
}

fn stale(level: Level, token: RequestToken) -> SessionEvent {
    SessionEvent::StaleResultDiscarded {
        level,
        request_id: token.request_id,
    }
}
