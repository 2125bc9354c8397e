//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::paste::DEFAULT_LEXER;
use crate::application::tasks::TaskConfig;
use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pastebin";
const DEFAULT_STORAGE_ROOT: &str = "data/pastes";

/// Command-line arguments for the pastebin binary.
#[derive(Debug, Parser)]
#[command(
    name = "pastebin",
    version,
    about = "Paste store with an in-memory accelerator"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PASTEBIN_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Store a new paste read from FILE, or stdin when omitted, and print its id.
    Create(CreateArgs),
    /// Print a paste's metadata as JSON.
    Meta(PasteIdArgs),
    /// Write a paste's raw content to stdout.
    Raw(PasteIdArgs),
    /// Print a paste's highlighted HTML.
    Render(RenderArgs),
    /// List every stored paste id.
    List,
    /// Schedule removal of a paste from storage and cache.
    Remove(PasteIdArgs),
    /// Remove every paste whose expiry has passed.
    PurgeExpired,
    /// List the lexer names the highlighter understands.
    Lexers,
}

#[derive(Debug, Args, Clone, Default)]
pub struct CreateArgs {
    /// File holding the paste content.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Assign a long id instead of a short one.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub long: bool,

    /// Paste title (at most 32 characters).
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Lexer used when rendering the paste.
    #[arg(long, value_name = "LEXER")]
    pub lexer: Option<String>,

    /// Expire the paste this many seconds after creation.
    #[arg(long = "expire-in", value_name = "SECONDS")]
    pub expire_in: Option<u64>,

    /// Precomputed password hash stored with the paste.
    #[arg(long = "password-hash", value_name = "HASH")]
    pub password_hash: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PasteIdArgs {
    /// Paste identifier.
    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Paste identifier.
    #[arg(value_name = "ID")]
    pub id: String,

    /// Render with this lexer instead of the paste's own; never cached.
    #[arg(long, value_name = "LEXER")]
    pub lexer: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the paste storage directory.
    #[arg(long = "storage-root", value_name = "PATH", global = true)]
    pub storage_root: Option<PathBuf>,

    /// Toggle the in-memory accelerator.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the number of cached metadata entries.
    #[arg(long = "cache-meta-limit", value_name = "COUNT", global = true)]
    pub cache_meta_limit: Option<usize>,

    /// Override the number of cached raw entries.
    #[arg(long = "cache-raw-limit", value_name = "COUNT", global = true)]
    pub cache_raw_limit: Option<usize>,

    /// Override the number of cached rendered entries.
    #[arg(long = "cache-rendered-limit", value_name = "COUNT", global = true)]
    pub cache_rendered_limit: Option<usize>,

    /// Override the largest raw paste the accelerator keeps, in bytes.
    #[arg(long = "cache-max-raw-bytes", value_name = "BYTES", global = true)]
    pub cache_max_raw_bytes: Option<usize>,

    /// Override the number of background workers.
    #[arg(long = "tasks-workers", value_name = "COUNT", global = true)]
    pub tasks_workers: Option<usize>,

    /// Override the background queue capacity.
    #[arg(long = "tasks-queue-capacity", value_name = "COUNT", global = true)]
    pub tasks_queue_capacity: Option<usize>,

    /// Override the lexer used when a paste names none.
    #[arg(long = "render-default-lexer", value_name = "LEXER", global = true)]
    pub render_default_lexer: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub tasks: TaskSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub meta_limit: usize,
    pub raw_limit: usize,
    pub rendered_limit: usize,
    pub max_raw_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub workers: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub default_lexer: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PASTEBIN").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    tasks: RawTaskSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(limit) = overrides.cache_meta_limit {
            self.cache.meta_limit = Some(limit);
        }
        if let Some(limit) = overrides.cache_raw_limit {
            self.cache.raw_limit = Some(limit);
        }
        if let Some(limit) = overrides.cache_rendered_limit {
            self.cache.rendered_limit = Some(limit);
        }
        if let Some(bytes) = overrides.cache_max_raw_bytes {
            self.cache.max_raw_bytes = Some(bytes);
        }
        if let Some(workers) = overrides.tasks_workers {
            self.tasks.workers = Some(workers);
        }
        if let Some(capacity) = overrides.tasks_queue_capacity {
            self.tasks.queue_capacity = Some(capacity);
        }
        if let Some(lexer) = overrides.render_default_lexer.as_ref() {
            self.render.default_lexer = Some(lexer.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            storage,
            cache,
            tasks,
            render,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            cache: build_cache_settings(cache)?,
            tasks: build_task_settings(tasks)?,
            render: build_render_settings(render)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "path must not be empty"));
    }
    Ok(StorageSettings { root })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();
    let enabled = cache.enabled.unwrap_or(defaults.enabled);

    let meta_limit = cache.meta_limit.unwrap_or(defaults.meta_limit);
    let raw_limit = cache.raw_limit.unwrap_or(defaults.raw_limit);
    let rendered_limit = cache.rendered_limit.unwrap_or(defaults.rendered_limit);
    if enabled {
        non_zero_usize(meta_limit, "cache.meta_limit")?;
        non_zero_usize(raw_limit, "cache.raw_limit")?;
        non_zero_usize(rendered_limit, "cache.rendered_limit")?;
    }

    Ok(CacheSettings {
        enabled,
        meta_limit,
        raw_limit,
        rendered_limit,
        max_raw_bytes: cache.max_raw_bytes.unwrap_or(defaults.max_raw_bytes),
    })
}

fn build_task_settings(tasks: RawTaskSettings) -> Result<TaskSettings, LoadError> {
    let defaults = TaskConfig::default();
    Ok(TaskSettings {
        workers: non_zero_usize(tasks.workers.unwrap_or(defaults.workers), "tasks.workers")?,
        queue_capacity: non_zero_usize(
            tasks.queue_capacity.unwrap_or(defaults.queue_capacity),
            "tasks.queue_capacity",
        )?,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let default_lexer = render
        .default_lexer
        .map(|lexer| lexer.trim().to_string())
        .unwrap_or_else(|| DEFAULT_LEXER.to_string());
    if default_lexer.is_empty() {
        return Err(LoadError::invalid(
            "render.default_lexer",
            "lexer name must not be empty",
        ));
    }
    Ok(RenderSettings { default_lexer })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    meta_limit: Option<usize>,
    raw_limit: Option<usize>,
    rendered_limit: Option<usize>,
    max_raw_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTaskSettings {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    default_lexer: Option<String>,
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
