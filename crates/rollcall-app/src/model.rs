// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};

use crate::ids::*;
use crate::{Fields, SessionError};

pub const CODE_FIELD: &str = "CÓDIGO";
pub const FULL_NAME_FIELD: &str = "NOME COMPLETO";
pub const NAME_FIELD: &str = "NOME";
pub const STATUS_FIELD: &str = "STATUS";
pub const LINE_NUMBER_FIELD: &str = "CELULAR";

pub const MISSING_NAME: &str = "(no name)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Status {
    Active,
    #[default]
    Standby,
    NotContacted,
    NotReturned,
    Refused,
    Returned,
}

impl Status {
    pub const ALL: [Self; 6] = [
        Self::Active,
        Self::Standby,
        Self::NotContacted,
        Self::NotReturned,
        Self::Refused,
        Self::Returned,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "A",
            Self::Standby => "S",
            Self::NotContacted => "NC",
            Self::NotReturned => "NR",
            Self::Refused => "X",
            Self::Returned => "R",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Standby => "Standby",
            Self::NotContacted => "Not contacted",
            Self::NotReturned => "Did not return",
            Self::Refused => "Refused",
            Self::Returned => "Returned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::Active),
            "S" => Some(Self::Standby),
            "NC" => Some(Self::NotContacted),
            "NR" => Some(Self::NotReturned),
            "X" => Some(Self::Refused),
            "R" => Some(Self::Returned),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label(), self.as_str())
    }
}

/// Hierarchy level, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Unit,
    Line,
    Block,
    Leaf,
}

impl Level {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Line => "line",
            Self::Block => "block",
            Self::Leaf => "leaf",
        }
    }

    pub const fn plural(self) -> &'static str {
        match self {
            Self::Unit => "units",
            Self::Line => "lines",
            Self::Block => "blocks",
            Self::Leaf => "contacts",
        }
    }
}

/// Composite key of a leaf: unique within one line even when local ids
/// repeat across blocks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeafIdentity {
    pub block: BlockId,
    pub local: LocalId,
}

impl LeafIdentity {
    pub fn new(block: impl Into<BlockId>, local: impl Into<LocalId>) -> Self {
        Self {
            block: block.into(),
            local: local.into(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (block, local) = value.split_once('|')?;
        if block.is_empty() || local.is_empty() {
            return None;
        }
        Some(Self::new(block, local))
    }
}

impl std::fmt::Display for LeafIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.block, self.local)
    }
}

/// How a block keeps its leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockShape {
    /// One document per leaf under the block's leaf collection.
    DocumentCollection,
    /// One map field on the block record, keyed by local id.
    MapField,
}

impl BlockShape {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentCollection => "documents",
            Self::MapField => "map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryEncoding {
    Native,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafOrigin {
    Document,
    MapEntry(EntryEncoding),
    /// Entry of a map field that is itself stored as one JSON text. Writes
    /// rewrite the whole field.
    PackedEntry(EntryEncoding),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafRecord {
    pub identity: LeafIdentity,
    pub code: String,
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub line_number: Option<String>,
    pub status: Option<Status>,
    pub origin: LeafOrigin,
    pub fields: Fields,
    pub decode_error: Option<String>,
}

impl LeafRecord {
    pub fn block(&self) -> &BlockId {
        &self.identity.block
    }

    pub fn local_id(&self) -> &LocalId {
        &self.identity.local
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(MISSING_NAME)
    }

    pub fn is_placeholder(&self) -> bool {
        self.decode_error.is_some()
    }

    pub fn decode_failure(&self) -> Option<SessionError> {
        self.decode_error.as_ref().map(|detail| SessionError::Decode {
            entry: self.identity.to_string(),
            detail: detail.clone(),
        })
    }
}

/// Leaves fetched for one block, in store order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLeaves {
    pub shape: BlockShape,
    pub leaves: Vec<LeafRecord>,
    /// Decoded map field when the block stores it as one JSON text.
    pub packed: Option<Fields>,
}

impl BlockLeaves {
    pub fn placeholder_count(&self) -> usize {
        self.leaves.iter().filter(|leaf| leaf.is_placeholder()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::{LeafIdentity, Status};

    #[test]
    fn status_codes_round_trip_through_parse() {
        for status in Status::ALL {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert_eq!(Status::parse(" nc "), Some(Status::NotContacted));
        assert_eq!(Status::parse("Z"), None);
        assert_eq!(Status::default(), Status::Standby);
    }

    #[test]
    fn status_display_pairs_label_and_code() {
        assert_eq!(Status::Refused.to_string(), "Refused (X)");
    }

    #[test]
    fn identities_with_same_local_id_differ_by_block() {
        let left = LeafIdentity::new("B1", "x1");
        let right = LeafIdentity::new("B2", "x1");
        assert_ne!(left, right);
        assert_eq!(left.to_string(), "B1|x1");
        assert_eq!(LeafIdentity::parse("B1|x1"), Some(left));
        assert_eq!(LeafIdentity::parse("|x1"), None);
        assert_eq!(LeafIdentity::parse("nope"), None);
    }
}
