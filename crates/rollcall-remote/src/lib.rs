// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, Response};
use rollcall_app::{
    BatchReceipt, ChildDocument, DocPath, FieldPath, Fields, HierarchyStore, WriteOp,
    apply_field_writes,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE: &str = "(default)";

const PAGE_SIZE: usize = 300;

/// Firestore REST client exposing the document tree as a [`HierarchyStore`].
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    project_id: String,
    database: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, project_id: &str, database: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("firestore.base_url must not be empty");
        }
        let parsed = Url::parse(trimmed)
            .with_context(|| format!("firestore.base_url {trimmed:?} is not a valid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "firestore.base_url must use http or https, got {}://",
                parsed.scheme()
            );
        }
        if parsed.cannot_be_a_base() {
            bail!("firestore.base_url {trimmed:?} cannot carry a path");
        }
        if project_id.trim().is_empty() {
            bail!("firestore.project_id must not be empty");
        }
        if database.trim().is_empty() {
            bail!("firestore.database must not be empty");
        }
        if timeout.is_zero() {
            bail!("firestore.timeout must be positive");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url: parsed,
            project_id: project_id.trim().to_owned(),
            database: database.trim().to_owned(),
            api_key: None,
            timeout,
            http,
        })
    }

    /// Sends `key` as the `key` query parameter on every request.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `projects/{project}/databases/{database}/documents`
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }

    /// Full resource name of `path`, as used in commit requests.
    pub fn resource_name(&self, path: &DocPath) -> String {
        format!("{}/{path}", self.documents_root())
    }

    pub fn get_document(&self, path: &DocPath) -> Result<Option<Fields>> {
        let url = self.endpoint(path.segments(), None)?;
        log::debug!("event=get_document module=remote status=start path={path}");
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|error| self.request_error(error))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document: RemoteDocument = decode_response(response, "decode document")?;
        document
            .decode_fields()
            .with_context(|| format!("decode fields of {path}"))
            .map(Some)
    }

    /// Lists every child of `collection`, following page tokens. Children
    /// that only exist as parents of deeper documents come back without data.
    pub fn list_documents(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.endpoint(collection.segments(), None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &PAGE_SIZE.to_string());
                query.append_pair("showMissing", "true");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self
                .http
                .get(url)
                .send()
                .map_err(|error| self.request_error(error))?;
            let page: ListResponse = decode_response(response, "decode document listing")?;

            for document in page.documents {
                let id = document.id().to_owned();
                let data = if document.is_missing() {
                    None
                } else {
                    Some(
                        document
                            .decode_fields()
                            .with_context(|| format!("decode fields of {collection}/{id}"))?,
                    )
                };
                children.push(ChildDocument { id, data });
            }

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        log::debug!(
            "event=list_documents module=remote status=ok collection={collection} count={}",
            children.len()
        );
        Ok(children)
    }

    /// Commits every op in one request; Firestore applies all or none.
    pub fn commit(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        let writes = ops
            .iter()
            .map(|op| self.encode_write(op))
            .collect::<Result<Vec<_>>>()?;
        let url = self.endpoint(&[], Some("documents:commit"))?;

        log::info!(
            "event=commit module=remote status=start writes={}",
            writes.len()
        );
        let response = self
            .http
            .post(url)
            .json(&CommitRequest { writes })
            .send()
            .map_err(|error| self.request_error(error))?;
        let parsed: CommitResponse = decode_response(response, "decode commit response")?;

        let committed_at = match parsed.commit_time.as_deref() {
            Some(raw) => Some(
                OffsetDateTime::parse(raw, &Rfc3339)
                    .with_context(|| format!("parse commit time {raw:?}"))?,
            ),
            None => None,
        };
        log::info!(
            "event=commit module=remote status=ok writes={} results={}",
            ops.len(),
            parsed.write_results.len()
        );
        Ok(BatchReceipt {
            writes: ops.len(),
            committed_at,
        })
    }

    fn encode_write(&self, op: &WriteOp) -> Result<RemoteWrite> {
        if !op.path.is_document() {
            bail!("{} is not a document path", op.path);
        }
        let mut nested = Fields::new();
        apply_field_writes(&mut nested, &op.fields);

        Ok(RemoteWrite {
            update: UpdateDocument {
                name: self.resource_name(&op.path),
                fields: encode_fields(&nested),
            },
            update_mask: DocumentMask {
                field_paths: op.fields.keys().map(mask_path).collect(),
            },
            current_document: Precondition { exists: true },
        })
    }

    /// `{base}/projects/{p}/databases/{d}/documents/{segments...}`, or with
    /// `leaf` replacing the trailing `documents` segment.
    fn endpoint(&self, segments: &[String], leaf: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| anyhow!("firestore.base_url cannot carry a path"))?;
            path.pop_if_empty().extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                self.database.as_str(),
            ]);
            match leaf {
                Some(leaf) => {
                    path.push(leaf);
                }
                None => {
                    path.push("documents");
                    path.extend(segments);
                }
            }
        }
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    fn request_error(&self, error: reqwest::Error) -> anyhow::Error {
        if error.is_timeout() {
            return anyhow!(
                "request to {} timed out after {}ms -- retry or raise firestore.timeout",
                self.base_url,
                self.timeout.as_millis()
            );
        }
        connection_error(self.base_url.as_str(), error)
    }
}

impl HierarchyStore for Client {
    fn list_children(&self, collection: &DocPath) -> Result<Vec<ChildDocument>> {
        self.list_documents(collection)
    }

    fn get_record(&self, path: &DocPath) -> Result<Option<Fields>> {
        self.get_document(path)
    }

    fn batch_update(&self, ops: &[WriteOp]) -> Result<BatchReceipt> {
        self.commit(ops)
    }
}

/// Converts plain JSON into Firestore's typed value form.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => match (number.as_i64(), number.as_u64()) {
            (Some(int), _) => json!({ "integerValue": int.to_string() }),
            (None, Some(int)) => json!({ "integerValue": int.to_string() }),
            _ => json!({ "doubleValue": number }),
        },
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

pub fn encode_fields(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

/// Converts one Firestore typed value into plain JSON. Timestamps,
/// references, and bytes become strings.
pub fn decode_value(value: &Value) -> Result<Value> {
    let Value::Object(typed) = value else {
        bail!("firestore value must be an object, got {value}");
    };
    let Some((kind, inner)) = typed.iter().next() else {
        bail!("firestore value has no type tag");
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => Ok(Value::Bool(inner.as_bool().unwrap_or(false))),
        "integerValue" => {
            let raw = match inner {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            let parsed: i64 = raw
                .parse()
                .with_context(|| format!("integerValue {raw:?} is not an integer"))?;
            Ok(Value::Number(Number::from(parsed)))
        }
        "doubleValue" => match inner {
            Value::Number(_) => Ok(inner.clone()),
            // NaN and infinities arrive as strings and have no JSON form.
            _ => Ok(Value::Null),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => {
            Ok(Value::String(inner.as_str().unwrap_or_default().to_owned()))
        }
        "geoPointValue" => Ok(json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        })),
        "mapValue" => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Ok(Value::Object(decode_fields(&fields)?))
        }
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            values
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        other => bail!("unsupported firestore value type `{other}`"),
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Result<Fields> {
    fields
        .iter()
        .map(|(key, value)| {
            decode_value(value)
                .with_context(|| format!("field `{key}`"))
                .map(|decoded| (key.clone(), decoded))
        })
        .collect()
}

/// Renders a field path for an update mask, back-quoting segments that are
/// not plain identifiers.
pub fn mask_path(path: &FieldPath) -> String {
    path.segments()
        .iter()
        .map(|segment| quote_segment(segment))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_segment(segment: &str) -> String {
    let mut chars = segment.chars();
    let simple = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|rest| rest.is_ascii_alphanumeric() || rest == '_');
    if simple {
        return segment.to_owned();
    }
    let escaped = segment.replace('\\', "\\\\").replace('`', "\\`");
    format!("`{escaped}`")
}

fn decode_response<T: for<'de> Deserialize<'de>>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(clean_error_response(status, &body));
    }
    response.json().with_context(|| what.to_owned())
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check firestore.base_url and network access ({})",
        base_url,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<GoogleErrorEnvelope>(body)
        && let Some(error) = parsed.error
        && !error.message.is_empty()
    {
        if error.status.is_empty() {
            return anyhow!("firestore error ({}): {}", status.as_u16(), error.message);
        }
        return anyhow!(
            "firestore error ({} {}): {}",
            status.as_u16(),
            error.status,
            error.message
        );
    }

    if body.len() < 100 && !body.contains('{') && !body.trim().is_empty() {
        return anyhow!("firestore error ({}): {}", status.as_u16(), body.trim());
    }

    anyhow!("firestore returned {}", status.as_u16())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDocument {
    name: String,
    #[serde(default)]
    fields: Option<Map<String, Value>>,
    #[serde(default)]
    create_time: Option<String>,
}

impl RemoteDocument {
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    fn is_missing(&self) -> bool {
        self.create_time.is_none() && self.fields.is_none()
    }

    fn decode_fields(&self) -> Result<Fields> {
        match &self.fields {
            Some(fields) => decode_fields(fields),
            None => Ok(Fields::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RemoteDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    writes: Vec<RemoteWrite>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteWrite {
    update: UpdateDocument,
    update_mask: DocumentMask,
    current_document: Precondition,
}

#[derive(Debug, Serialize)]
struct UpdateDocument {
    name: String,
    fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentMask {
    field_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Precondition {
    exists: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<Value>,
    #[serde(default)]
    commit_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: Option<GoogleErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}
