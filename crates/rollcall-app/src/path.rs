// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::ids::*;

pub const DEFAULT_ROOT_COLLECTION: &str = "contatos";
pub const DEFAULT_LINES_COLLECTION: &str = "celulares";
pub const DEFAULT_BLOCKS_COLLECTION: &str = "blocos";
/// Collection the status writes have always targeted. Line-wide code lists
/// kept under `docs` are reached with `[schema].leaves = "docs"`.
pub const DEFAULT_LEAVES_COLLECTION: &str = "contatos";
pub const DEFAULT_MAP_FIELD: &str = "codigos";

/// Slash-separated address of a collection (odd segment count) or a
/// document (even segment count).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocPath(Vec<String>);

impl DocPath {
    pub fn collection(name: &str) -> Self {
        Self(vec![name.to_owned()])
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            bail!("document path must not be empty");
        }
        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            validate_segment(segment)?;
            segments.push(segment.to_owned());
        }
        Ok(Self(segments))
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_owned());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_document(&self) -> bool {
        !self.0.is_empty() && self.0.len() % 2 == 0
    }

    pub fn id(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Every document path strictly above this path, shallowest first.
    pub fn ancestor_documents(&self) -> Vec<Self> {
        (1..self.0.len())
            .filter(|len| len % 2 == 0)
            .map(|len| Self(self.0[..len].to_vec()))
            .collect()
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Nested field address inside one document record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn single(name: &str) -> Self {
        Self(vec![name.to_owned()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.trim().is_empty() {
        bail!("path segment must not be blank");
    }
    if segment.contains('/') {
        bail!("path segment {segment:?} must not contain '/'");
    }
    if segment == "." || segment == ".." {
        bail!("path segment {segment:?} is reserved");
    }
    Ok(())
}

/// Collection names of the unit -> line -> block -> leaf tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLayout {
    pub root: String,
    pub lines: String,
    pub blocks: String,
    pub leaves: String,
    pub map_field: String,
}

impl Default for HierarchyLayout {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT_COLLECTION.to_owned(),
            lines: DEFAULT_LINES_COLLECTION.to_owned(),
            blocks: DEFAULT_BLOCKS_COLLECTION.to_owned(),
            leaves: DEFAULT_LEAVES_COLLECTION.to_owned(),
            map_field: DEFAULT_MAP_FIELD.to_owned(),
        }
    }
}

impl HierarchyLayout {
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("root", &self.root),
            ("lines", &self.lines),
            ("blocks", &self.blocks),
            ("leaves", &self.leaves),
            ("map_field", &self.map_field),
        ] {
            if let Err(error) = validate_segment(value) {
                bail!("schema.{key} is invalid: {error}");
            }
        }
        Ok(())
    }

    pub fn units(&self) -> DocPath {
        DocPath::collection(&self.root)
    }

    pub fn lines(&self, unit: &UnitId) -> DocPath {
        self.units().child(unit.as_str()).child(&self.lines)
    }

    pub fn blocks(&self, unit: &UnitId, line: &LineId) -> DocPath {
        self.lines(unit).child(line.as_str()).child(&self.blocks)
    }

    pub fn block_record(&self, unit: &UnitId, line: &LineId, block: &BlockId) -> DocPath {
        self.blocks(unit, line).child(block.as_str())
    }

    pub fn leaves(&self, unit: &UnitId, line: &LineId, block: &BlockId) -> DocPath {
        self.block_record(unit, line, block).child(&self.leaves)
    }

    pub fn leaf_record(
        &self,
        unit: &UnitId,
        line: &LineId,
        block: &BlockId,
        local: &LocalId,
    ) -> DocPath {
        self.leaves(unit, line, block).child(local.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{DocPath, HierarchyLayout};
    use crate::{BlockId, LineId, LocalId, UnitId};
    use anyhow::Result;

    #[test]
    fn default_layout_matches_contact_tree() {
        let layout = HierarchyLayout::default();
        let path = layout.leaf_record(
            &UnitId::from("AA"),
            &LineId::from("11999990000"),
            &BlockId::from("B1"),
            &LocalId::from("x1"),
        );
        assert_eq!(
            path.to_string(),
            "contatos/AA/celulares/11999990000/blocos/B1/contatos/x1"
        );
        assert!(path.is_document());
        assert_eq!(path.id(), "x1");
    }

    #[test]
    fn ancestor_documents_skip_collections() -> Result<()> {
        let path = DocPath::parse("contatos/AA/celulares/L1/blocos/B1")?;
        let ancestors: Vec<String> = path
            .ancestor_documents()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ancestors, vec!["contatos/AA", "contatos/AA/celulares/L1"]);
        Ok(())
    }

    #[test]
    fn parse_rejects_blank_segments() {
        assert!(DocPath::parse("").is_err());
        assert!(DocPath::parse("contatos//AA").is_err());
        assert!(DocPath::parse("contatos/../AA").is_err());
    }

    #[test]
    fn parent_of_document_is_its_collection() -> Result<()> {
        let path = DocPath::parse("contatos/AA")?;
        assert_eq!(path.parent(), Some(DocPath::collection("contatos")));
        assert_eq!(DocPath::collection("contatos").parent(), None);
        Ok(())
    }

    #[test]
    fn layout_validation_names_the_bad_key() {
        let layout = HierarchyLayout {
            blocks: "a/b".to_owned(),
            ..HierarchyLayout::default()
        };
        let error = layout.validate().expect_err("slash in collection name");
        assert!(error.to_string().contains("schema.blocks"));
    }
}
