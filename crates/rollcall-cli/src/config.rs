// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use rollcall_app::HierarchyLayout;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging;

const CONFIG_VERSION: i64 = 1;
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_LOG_LEVEL: &str = "info";
pub const LOG_LEVEL_ENV: &str = "ROLLCALL_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Firestore,
}

impl BackendKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "firestore" => Some(Self::Firestore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub firestore: Firestore,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            store: StoreSection::default(),
            firestore: Firestore::default(),
            schema: Schema::default(),
            logging: Logging::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    pub backend: Option<String>,
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Firestore {
    pub base_url: Option<String>,
    pub project_id: Option<String>,
    pub database: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Option<String>,
}

impl Default for Firestore {
    fn default() -> Self {
        Self {
            base_url: Some(rollcall_remote::DEFAULT_BASE_URL.to_owned()),
            project_id: None,
            database: Some(rollcall_remote::DEFAULT_DATABASE.to_owned()),
            api_key: None,
            timeout: Some(DEFAULT_TIMEOUT.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schema {
    pub root: Option<String>,
    pub lines: Option<String>,
    pub blocks: Option<String>,
    pub leaves: Option<String>,
    pub map_field: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Logging {
    pub level: Option<String>,
    pub dir: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("ROLLCALL_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set ROLLCALL_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(rollcall_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [store], [firestore], [schema], and [logging]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let backend = self.backend()?;

        if let Some(db_path) = &self.store.db_path {
            rollcall_db::validate_db_path(db_path)?;
        }

        if backend == BackendKind::Firestore && self.project_id().is_none() {
            bail!(
                "firestore.project_id in {} is required when store.backend = \"firestore\"",
                path.display()
            );
        }

        if let Some(timeout) = &self.firestore.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed.is_zero() {
                bail!(
                    "firestore.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        self.layout()
            .validate()
            .with_context(|| format!("invalid [schema] in {}", path.display()))?;

        if let Some(level) = &self.logging.level {
            logging::normalize_level(level)
                .with_context(|| format!("invalid logging.level in {}", path.display()))?;
        }
        if let Some(dir) = &self.logging.dir {
            logging::normalize_log_dir(dir)
                .with_context(|| format!("invalid logging.dir in {}", path.display()))?;
        }

        Ok(())
    }

    pub fn backend(&self) -> Result<BackendKind> {
        match &self.store.backend {
            None => Ok(BackendKind::Sqlite),
            Some(raw) => BackendKind::parse(raw).ok_or_else(|| {
                anyhow!("store.backend must be \"sqlite\" or \"firestore\", got {raw:?}")
            }),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.store.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => rollcall_db::default_db_path(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.firestore
            .base_url
            .as_deref()
            .unwrap_or(rollcall_remote::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn project_id(&self) -> Option<&str> {
        self.firestore
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn database(&self) -> &str {
        self.firestore
            .database
            .as_deref()
            .unwrap_or(rollcall_remote::DEFAULT_DATABASE)
    }

    pub fn api_key(&self) -> Option<String> {
        self.firestore.api_key.clone()
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(self.firestore.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))
    }

    pub fn layout(&self) -> HierarchyLayout {
        let defaults = HierarchyLayout::default();
        let pick = |value: &Option<String>, fallback: String| value.clone().unwrap_or(fallback);
        HierarchyLayout {
            root: pick(&self.schema.root, defaults.root),
            lines: pick(&self.schema.lines, defaults.lines),
            blocks: pick(&self.schema.blocks, defaults.blocks),
            leaves: pick(&self.schema.leaves, defaults.leaves),
            map_field: pick(&self.schema.map_field, defaults.map_field),
        }
    }

    /// `ROLLCALL_LOG` wins over `[logging].level`.
    pub fn log_level(&self) -> String {
        env::var(LOG_LEVEL_ENV)
            .ok()
            .filter(|level| !level.trim().is_empty())
            .or_else(|| self.logging.level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned())
    }

    pub fn log_dir(&self) -> Option<&str> {
        self.logging.dir.as_deref()
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# rollcall config\n# Place this file at: {}\n\nversion = 1\n\n[store]\n# \"sqlite\" (local file) or \"firestore\" (REST API)\nbackend = \"sqlite\"\n# Optional. Default is platform data dir (for example ~/.local/share/rollcall/rollcall.db)\n# db_path = \"/absolute/path/to/rollcall.db\"\n\n[firestore]\nbase_url = \"{}\"\n# project_id = \"my-project\"\ndatabase = \"{}\"\n# api_key = \"...\"\ntimeout = \"{}\"\n\n[schema]\nroot = \"{}\"\nlines = \"{}\"\nblocks = \"{}\"\n# \"docs\" for blocks whose code list lives under blocos/<block>/docs\nleaves = \"{}\"\nmap_field = \"{}\"\n\n[logging]\nlevel = \"{}\"\n# dir = \"/absolute/path/to/logs\"\n",
            path.display(),
            rollcall_remote::DEFAULT_BASE_URL,
            rollcall_remote::DEFAULT_DATABASE,
            DEFAULT_TIMEOUT,
            rollcall_app::DEFAULT_ROOT_COLLECTION,
            rollcall_app::DEFAULT_LINES_COLLECTION,
            rollcall_app::DEFAULT_BLOCKS_COLLECTION,
            rollcall_app::DEFAULT_LEAVES_COLLECTION,
            rollcall_app::DEFAULT_MAP_FIELD,
            DEFAULT_LOG_LEVEL,
        )
    }
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| anyhow!("timeout duration {raw:?} is too large"))?;
        return Ok(Duration::from_secs(secs));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 10s)")
}
