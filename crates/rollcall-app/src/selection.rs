// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::HashSet;

use crate::{BlockId, LeafIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAllOutcome {
    Selected(usize),
    Deselected(usize),
    Unchanged,
}

/// Selected leaf identities. Independent of the filter: hiding a leaf never
/// removes it from the set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionSet {
    members: HashSet<LeafIdentity>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the identity is selected afterwards.
    pub fn toggle(&mut self, identity: &LeafIdentity) -> bool {
        if self.members.remove(identity) {
            false
        } else {
            self.members.insert(identity.clone());
            true
        }
    }

    /// Deselects exactly `visible` when all of it is already selected,
    /// otherwise selects all of it. Members outside `visible` are untouched.
    pub fn toggle_all<'a, I>(&mut self, visible: I) -> ToggleAllOutcome
    where
        I: IntoIterator<Item = &'a LeafIdentity>,
    {
        let visible: Vec<&LeafIdentity> = visible.into_iter().collect();
        if visible.is_empty() {
            return ToggleAllOutcome::Unchanged;
        }

        if visible.iter().all(|identity| self.members.contains(*identity)) {
            for identity in &visible {
                self.members.remove(*identity);
            }
            return ToggleAllOutcome::Deselected(visible.len());
        }

        let mut added = 0;
        for identity in visible {
            if self.members.insert(identity.clone()) {
                added += 1;
            }
        }
        ToggleAllOutcome::Selected(added)
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn contains(&self, identity: &LeafIdentity) -> bool {
        self.members.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeafIdentity> {
        self.members.iter()
    }

    /// Members in a stable order, for planning writes and for display.
    pub fn sorted(&self) -> Vec<&LeafIdentity> {
        let mut members: Vec<&LeafIdentity> = self.members.iter().collect();
        members.sort();
        members
    }

    /// Drops members of `block` for which `keep` returns false; returns how
    /// many were dropped.
    pub fn retain_in_block<F>(&mut self, block: &BlockId, mut keep: F) -> usize
    where
        F: FnMut(&LeafIdentity) -> bool,
    {
        let before = self.members.len();
        self.members
            .retain(|identity| &identity.block != block || keep(identity));
        before - self.members.len()
    }
}
