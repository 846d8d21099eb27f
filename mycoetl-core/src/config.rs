//! Configuration system for mycoetl.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace `mycoetl.toml` -> explicit config file -> environment.
//! Settings are loaded once at process start and published through
//! [`init_global`] / [`global`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{EtlError, Result};

/// Default UCI mushroom dataset location.
pub const UCI_MUSHROOM_URL: &str =
    "https://archive.ics.uci.edu/ml/machine-learning-databases/mushroom/agaricus-lepiota.data";

/// Name of the workspace-level config file.
pub const WORKSPACE_CONFIG_FILE: &str = "mycoetl.toml";

/// Top-level settings for a pipeline process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Raw extracted data and extraction metadata.
    #[serde(default = "default_raw_dir")]
    pub raw_data_dir: PathBuf,
    /// Processed output, loader sidecars and pipeline run logs.
    #[serde(default = "default_processed_dir")]
    pub processed_data_dir: PathBuf,
    /// Model artifacts (kept for layout compatibility; nothing writes here).
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub data_source: DataSourceSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Rows per insert transaction for database loads.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            raw_data_dir: default_raw_dir(),
            processed_data_dir: default_processed_dir(),
            models_dir: default_models_dir(),
            database: DatabaseSettings::default(),
            data_source: DataSourceSettings::default(),
            logging: LoggingConfig::default(),
            batch_size: default_batch_size(),
        }
    }
}

impl Settings {
    /// Create every configured data directory.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.data_dir,
            &self.raw_data_dir,
            &self.processed_data_dir,
            &self.models_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Rebase every relative path onto `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        rebase(&mut self.data_dir);
        rebase(&mut self.raw_data_dir);
        rebase(&mut self.processed_data_dir);
        rebase(&mut self.models_dir);
        rebase(&mut self.logging.file);
        if let Some(path) = self.database.url.strip_prefix("sqlite:///") {
            let path = Path::new(path);
            if !path.as_os_str().is_empty() && path != Path::new(":memory:") && path.is_relative()
            {
                self.database.url = format!("sqlite:///{}", root.join(path).display());
            }
        }
        self
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("data/models")
}

fn default_batch_size() -> usize {
    1000
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Connection string. Only `sqlite://` URLs are supported.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Destination table for the loaded dataset.
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            table_name: default_table_name(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:///data/mushroom_etl.db".to_string()
}

fn default_table_name() -> String {
    "mushroom_data".to_string()
}

/// Remote source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceSettings {
    #[serde(default = "default_uci_url")]
    pub uci_mushroom_url: String,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            uci_mushroom_url: default_uci_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_uci_url() -> String {
    UCI_MUSHROOM_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Output format for the stderr log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive for stderr output (`info`, `debug`, `mycoetl_core=trace`, ...).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON log file. Rotated daily; the directory part selects the log dir.
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    /// Whether the JSON file layer is installed at all.
    #[serde(default = "default_true")]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            format: LogFormat::default(),
            file_enabled: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/etl_pipeline.log")
}

fn default_true() -> bool {
    true
}

/// Load settings from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`MYCOETL_` prefix, `__` for nesting)
/// 2. Explicit config file (`--config`)
/// 3. Workspace config (`<workspace>/mycoetl.toml`)
/// 4. User config (`~/.config/mycoetl/config.toml`)
/// 5. Built-in defaults
pub fn load_settings(
    workspace: Option<&Path>,
    explicit_file: Option<&Path>,
) -> std::result::Result<Settings, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "mycoetl", "mycoetl") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit_file {
        figment = figment.merge(Toml::file(path));
    }

    // MYCOETL_DATABASE__URL, MYCOETL_LOGGING__LEVEL, MYCOETL_BATCH_SIZE, ...
    figment = figment.merge(Env::prefixed("MYCOETL_").split("__"));

    figment.extract().map_err(Box::new)
}

static GLOBAL_SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Publish the process-wide settings. Fails if already initialized.
pub fn init_global(settings: Settings) -> Result<&'static Settings> {
    GLOBAL_SETTINGS
        .set(settings)
        .map_err(|_| EtlError::config("global settings already initialized"))?;
    Ok(global())
}

/// Process-wide settings; built-in defaults if [`init_global`] was never called.
pub fn global() -> &'static Settings {
    GLOBAL_SETTINGS.get_or_init(Settings::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.database.table_name, "mushroom_data");
        assert_eq!(settings.database.url, "sqlite:///data/mushroom_etl.db");
        assert_eq!(settings.batch_size, 1000);
        assert_eq!(settings.data_source.timeout_secs, 30);
        assert_eq!(settings.logging.format, LogFormat::Full);
    }

    #[test]
    fn test_workspace_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            "batch_size = 250\n[database]\ntable_name = \"fungi\"\n",
        )
        .unwrap();

        let settings = load_settings(Some(dir.path()), None).unwrap();
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.database.table_name, "fungi");
        assert_eq!(settings.database.url, "sqlite:///data/mushroom_etl.db");
    }

    #[test]
    fn test_explicit_file_beats_workspace_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(WORKSPACE_CONFIG_FILE), "batch_size = 250\n").unwrap();
        let explicit = dir.path().join("override.toml");
        std::fs::write(&explicit, "batch_size = 10\n").unwrap();

        let settings = load_settings(Some(dir.path()), Some(&explicit)).unwrap();
        assert_eq!(settings.batch_size, 10);
    }

    #[test]
    fn test_rooted_at_only_touches_relative_paths() {
        let mut settings = Settings::default();
        settings.models_dir = PathBuf::from("/opt/models");
        let rooted = settings.rooted_at(Path::new("/srv/etl"));
        assert_eq!(rooted.raw_data_dir, PathBuf::from("/srv/etl/data/raw"));
        assert_eq!(rooted.models_dir, PathBuf::from("/opt/models"));
        assert_eq!(
            rooted.logging.file,
            PathBuf::from("/srv/etl/logs/etl_pipeline.log")
        );
        assert_eq!(rooted.database.url, "sqlite:////srv/etl/data/mushroom_etl.db");
    }

    #[test]
    fn test_rooted_at_leaves_absolute_and_memory_databases() {
        for url in ["sqlite:////var/lib/etl.db", "sqlite:///:memory:", "sqlite://"] {
            let mut settings = Settings::default();
            settings.database.url = url.to_string();
            assert_eq!(settings.rooted_at(Path::new("/srv/etl")).database.url, url);
        }
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::default().rooted_at(dir.path());
        settings.ensure_directories().unwrap();
        assert!(dir.path().join("data/raw").is_dir());
        assert!(dir.path().join("data/processed").is_dir());
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");
    }
}
