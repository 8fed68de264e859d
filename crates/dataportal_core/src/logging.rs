//! Portal logging bootstrap and per-entity severity policy.
//!
//! # Responsibility
//! - Resolve a [`LoggingConfig`] from `LogLevel`, `LogDir` and
//!   `LogLevel.<EntityType>` settings.
//! - Start one size-rotated file logger per process with an entity-aware
//!   line filter in front of it.
//! - Capture panics raised inside portal operations as sanitized log events.
//!
//! # Invariants
//! - Lines are `key=value` events; `entity=<TypeName>` selects the entity
//!   threshold, every other line uses the default level.
//! - Entity payloads and SQL parameter values are never logged.
//! - Starting again with an equal config is a no-op; any other config is
//!   rejected and never panics.

use crate::config::Settings;
use flexi_logger::filter::{LogLineFilter, LogLineWriter};
use flexi_logger::{
    Cleanup, Criterion, DeferredNow, FileSpec, LogSpecification, Logger, LoggerHandle, Naming,
    WriteMode,
};
use log::{error, info, LevelFilter, Record};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "dataportal";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
const ENTITY_FIELD: &str = "entity=";

/// Setting naming the default level; also the prefix of per-entity levels.
pub const LOG_LEVEL_SETTING: &str = "LogLevel";
/// Setting naming the absolute log directory.
pub const LOG_DIR_SETTING: &str = "LogDir";

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    config: LoggingConfig,
    _handle: LoggerHandle,
}

/// Where portal diagnostics go and how verbose they are per entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    level: LevelFilter,
    log_dir: PathBuf,
    entity_levels: BTreeMap<String, LevelFilter>,
}

impl LoggingConfig {
    /// # Errors
    /// - Unsupported `level`.
    /// - Empty or relative `log_dir`.
    pub fn new(level: &str, log_dir: &str) -> Result<Self, String> {
        Ok(Self {
            level: parse_level(level)?,
            log_dir: normalize_log_dir(log_dir)?,
            entity_levels: BTreeMap::new(),
        })
    }

    /// Overrides the threshold for lines tagged `entity=<entity>`.
    pub fn with_entity_level(mut self, entity: &str, level: &str) -> Result<Self, String> {
        let entity = entity.trim();
        if entity.is_empty() {
            return Err("entity log level needs a type name".to_string());
        }
        self.entity_levels.insert(entity.to_string(), parse_level(level)?);
        Ok(self)
    }

    /// Reads `LogDir`, `LogLevel` and every `LogLevel.<EntityType>`.
    ///
    /// Returns `Ok(None)` when `LogDir` is absent.
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>, String> {
        let Some(log_dir) = settings.get(LOG_DIR_SETTING) else {
            return Ok(None);
        };
        let level = settings.get_or(LOG_LEVEL_SETTING, default_log_level());
        settings
            .section(LOG_LEVEL_SETTING)
            .try_fold(Self::new(level, log_dir)?, |config, (entity, level)| {
                config.with_entity_level(entity, level)
            })
            .map(Some)
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Threshold for a line about `entity`, or the default when untagged.
    pub fn threshold(&self, entity: Option<&str>) -> LevelFilter {
        entity
            .and_then(|name| self.entity_levels.get(name))
            .copied()
            .unwrap_or(self.level)
    }

    /// Backend level: the most verbose threshold, so the filter sees every
    /// line some entity wants.
    fn backend_level(&self) -> LevelFilter {
        self.entity_levels
            .values()
            .copied()
            .fold(self.level, std::cmp::Ord::max)
    }
}

/// Drops lines below the threshold of the entity they name.
struct EntityLevelFilter {
    config: LoggingConfig,
}

impl LogLineFilter for EntityLevelFilter {
    fn write(
        &self,
        now: &mut DeferredNow,
        record: &Record,
        log_line_writer: &dyn LogLineWriter,
    ) -> std::io::Result<()> {
        let line = record.args().to_string();
        if record.level() <= self.config.threshold(entity_of(&line)) {
            log_line_writer.write(now, record)?;
        }
        Ok(())
    }
}

/// Value of the `entity=` field of an event line.
fn entity_of(line: &str) -> Option<&str> {
    line.split_whitespace()
        .find_map(|field| field.strip_prefix(ENTITY_FIELD))
        .filter(|entity| !entity.is_empty())
}

/// Starts logging with one default `level` and no entity overrides.
///
/// # Errors
/// - See [`init_logging_with`].
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    init_logging_with(LoggingConfig::new(level, log_dir)?)
}

/// Starts logging from settings; `Ok(false)` when `LogDir` is absent.
///
/// # Errors
/// - See [`init_logging_with`].
pub fn init_logging_from_settings(settings: &Settings) -> Result<bool, String> {
    match LoggingConfig::from_settings(settings)? {
        Some(config) => init_logging_with(config).map(|()| true),
        None => Ok(false),
    }
}

/// Starts the process logger once.
///
/// # Errors
/// - The directory cannot be created or the backend fails to start.
/// - Logging is already active with a different config.
pub fn init_logging_with(config: LoggingConfig) -> Result<(), String> {
    if let Some(active) = ACTIVE.get() {
        return same_config(&active.config, &config);
    }

    let active = ACTIVE.get_or_try_init(|| -> Result<ActiveLogger, String> {
        std::fs::create_dir_all(&config.log_dir).map_err(|err| {
            format!(
                "failed to create log directory `{}`: {err}",
                config.log_dir.display()
            )
        })?;

        let handle = Logger::with(
            LogSpecification::builder()
                .default(config.backend_level())
                .build(),
        )
        .filter(Box::new(EntityLevelFilter {
            config: config.clone(),
        }))
        .log_to_file(
            FileSpec::default()
                .directory(config.log_dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

        install_panic_hook_once();

        info!(
            "event=logging_start module=logging status=ok platform={} version={} level={} entity_overrides={} log_dir={}",
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION"),
            config.level,
            config.entity_levels.len(),
            config.log_dir.display()
        );

        Ok(ActiveLogger {
            config: config.clone(),
            _handle: handle,
        })
    })?;

    same_config(&active.config, &config)
}

fn same_config(active: &LoggingConfig, requested: &LoggingConfig) -> Result<(), String> {
    if active == requested {
        return Ok(());
    }
    if active.log_dir != requested.log_dir {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            active.log_dir.display(),
            requested.log_dir.display()
        ));
    }
    Err(format!(
        "logging already initialized with level `{}`; refusing to switch levels",
        active.level
    ))
}

/// Active config, or `None` before logging starts.
pub fn logging_status() -> Option<LoggingConfig> {
    ACTIVE.get().map(|active| active.config.clone())
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::Trace),
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" | "warning" => Ok(LevelFilter::Warn),
        "error" => Ok(LevelFilter::Error),
        "off" => Ok(LevelFilter::Off),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error|off"
        )),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.get().is_some() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Payload may carry entity data; flatten and cap it.
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            panic_payload_summary(panic_info)
        );
        previous_hook(panic_info);
    }));

    let _ = PANIC_HOOK_INSTALLED.set(());
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut capped: String = flattened.chars().take(max_chars).collect();
    if flattened.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}
