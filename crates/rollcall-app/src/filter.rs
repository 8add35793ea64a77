// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::LeafRecord;

/// Case-insensitive substring match over code, full name, name, and line
/// number. An empty term keeps every leaf in its original order.
pub fn filter_leaves<'a, I>(leaves: I, term: &str) -> Vec<&'a LeafRecord>
where
    I: IntoIterator<Item = &'a LeafRecord>,
{
    if term.is_empty() {
        return leaves.into_iter().collect();
    }
    let needle = term.to_lowercase();
    leaves
        .into_iter()
        .filter(|leaf| matches_term(leaf, &needle))
        .collect()
}

/// `needle` must already be lower-cased.
pub fn matches_term(leaf: &LeafRecord, needle: &str) -> bool {
    let candidates = [
        Some(leaf.code.as_str()),
        leaf.full_name.as_deref(),
        leaf.name.as_deref(),
        leaf.line_number.as_deref(),
    ];
    candidates
        .into_iter()
        .flatten()
        .any(|value| value.to_lowercase().contains(needle))
}
