// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::Level;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Fetch { level: Level, detail: String },
    Decode { entry: String, detail: String },
    Validation(String),
    Mutation(String),
}

impl SessionError {
    pub fn fetch(level: Level, detail: impl Into<String>) -> Self {
        Self::Fetch {
            level,
            detail: detail.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Mutation(_))
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch { level, detail } => {
                write!(f, "loading {} failed: {detail}; retry to reload", level.plural())
            }
            Self::Decode { entry, detail } => write!(f, "entry {entry} could not be decoded: {detail}"),
            Self::Validation(message) => f.write_str(message),
            Self::Mutation(detail) => write!(f, "status update failed: {detail}"),
        }
    }
}

impl std::error::Error for SessionError {}
