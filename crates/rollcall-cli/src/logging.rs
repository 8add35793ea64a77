// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Process-wide logger bootstrap. Initialised once; a second call with the
//! same settings is a no-op and a call with different settings is refused.

use anyhow::{Result, anyhow, bail};
use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

const LOG_FILE_BASENAME: &str = "rollcall";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGING_STATE: OnceLock<Mutex<Option<LoggingState>>> = OnceLock::new();

struct LoggingState {
    level: &'static str,
    log_dir: Option<PathBuf>,
    _logger: LoggerHandle,
}

/// Starts logging at `level`, to stderr or, when `log_dir` is set, to
/// rotating files in that directory with warnings echoed to stderr.
pub fn init_logging(level: &str, log_dir: Option<&str>) -> Result<()> {
    let level = normalize_level(level)?;
    let log_dir = log_dir.map(normalize_log_dir).transpose()?;

    let mut slot = LOGGING_STATE
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(state) = slot.as_ref() {
        if state.log_dir != log_dir {
            bail!(
                "logging already initialized at {}; refusing to switch to {}",
                describe(state.log_dir.as_deref()),
                describe(log_dir.as_deref())
            );
        }
        if state.level != level {
            bail!(
                "logging already initialized with level `{}`; refusing to switch to `{level}`",
                state.level
            );
        }
        return Ok(());
    }

    let logger = Logger::try_with_str(level)
        .map_err(|error| anyhow!("invalid log level `{level}`: {error}"))?;
    let logger = match &log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|error| anyhow!("create log directory {}: {error}", dir.display()))?;
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_files(flexi_logger::detailed_format)
        }
        None => logger.log_to_stderr(),
    };
    let handle = logger
        .start()
        .map_err(|error| anyhow!("failed to start logger: {error}"))?;

    log::info!(
        "event=app_start module=cli status=ok version={} level={level} log_dir={}",
        env!("CARGO_PKG_VERSION"),
        describe(log_dir.as_deref())
    );

    *slot = Some(LoggingState {
        level,
        log_dir,
        _logger: handle,
    });
    Ok(())
}

pub fn normalize_level(level: &str) -> Result<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => bail!("unsupported log level `{other}`; expected trace|debug|info|warn|error"),
    }
}

pub fn normalize_log_dir(log_dir: &str) -> Result<PathBuf> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        bail!("log dir cannot be empty");
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        bail!("log dir must be an absolute path, got `{trimmed}`");
    }
    Ok(path.to_path_buf())
}

fn describe(dir: Option<&Path>) -> String {
    match dir {
        Some(dir) => dir.display().to_string(),
        None => "stderr".to_owned(),
    }
}
