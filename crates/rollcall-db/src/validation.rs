// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use rollcall_app::Fields;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    InvalidJson(String),
    NotAnObject,
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson(detail) => write!(f, "stored record is not valid JSON: {detail}"),
            Self::NotAnObject => f.write_str("stored record is not a JSON object"),
        }
    }
}

impl std::error::Error for RecordError {}

pub type RecordResult<T> = std::result::Result<T, RecordError>;

/// Parses the `data` column of a document row.
pub fn decode_record(raw: &str) -> RecordResult<Fields> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(RecordError::NotAnObject),
        Err(error) => Err(RecordError::InvalidJson(error.to_string())),
    }
}

pub fn encode_record(fields: &Fields) -> String {
    Value::Object(fields.clone()).to_string()
}

/// Text form of a path used as a row key: segments joined by `/`.
pub fn row_key(segments: &[String]) -> String {
    segments.join("/")
}
