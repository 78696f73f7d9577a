//! Configuration loading and root folder resolution
//!
//! Priority for every setting: command-line argument → environment variable →
//! TOML config file → compiled default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "CIVTRACK_ROOT";
/// Environment variable overriding the ballot provider base URL
pub const BALLOTS_URL_ENV: &str = "CIVTRACK_BALLOTS_URL";
/// Environment variable overriding the graph-query endpoint
pub const SPARQL_URL_ENV: &str = "CIVTRACK_SPARQL_URL";
/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV: &str = "CIVTRACK_LOG_LEVEL";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "civtrack.db";

/// Top-level TOML configuration
///
/// Every section is optional in the file; missing values fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the database (overridden by CLI / env)
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "civtrack_sync=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum pooled SQLite connections
    pub max_connections: u32,
    /// Upper bound on lock-contention retries, in milliseconds
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            max_lock_wait_ms: 5000,
        }
    }
}

/// Remote source endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Base URL of the parliamentary-votes provider (`{base}/{session}/ballots/json`)
    pub ballots_base_url: String,
    /// Full URL of the graph-query endpoint (`?query=…&format=json` is appended)
    pub sparql_url: String,
    /// Identifier source name used for voter slugs from the votes provider
    pub ballots_identifier_source: String,
    /// Identifier source whose ids are looked up in the knowledge graph
    pub death_date_identifier_source: String,
    /// Graph property carrying the external identifier the queries are keyed on
    pub external_id_property: String,
    /// User-Agent sent with every outbound request
    pub user_agent: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            ballots_base_url: "https://www.nosdeputes.fr".to_string(),
            sparql_url: "https://query.wikidata.org/sparql".to_string(),
            ballots_identifier_source: "nosdeputes".to_string(),
            death_date_identifier_source: "assemblee-nationale".to_string(),
            external_id_property: "P4123".to_string(),
            user_agent: format!("civtrack/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Pacing and batching of sync runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Hard wall-clock timeout applied to every outbound request
    pub request_timeout_secs: u64,
    /// Maximum number of redirects followed per request
    pub max_redirects: usize,
    /// Pause inserted after every `delay_every` ballots
    pub item_delay_ms: u64,
    pub delay_every: usize,
    /// Progress callback interval, in items
    pub progress_every: usize,
    /// Ids per graph query
    pub death_date_batch_size: usize,
    /// Minimum interval between two graph queries
    pub graph_min_interval_ms: u64,
    /// Extra attempts for a detail fetch that failed transiently (0 = never retry)
    pub max_item_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_redirects: 5,
            item_delay_ms: 500,
            delay_every: 10,
            progress_every: 50,
            death_date_batch_size: 50,
            graph_min_interval_ms: 1000,
            max_item_retries: 0,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5740".to_string(),
        }
    }
}

impl TomlConfig {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the platform default location
    /// is used when present, otherwise built-in defaults apply. Environment
    /// overrides are applied last, then the result is validated.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Loaded TOML config");
        Ok(config)
    }

    /// Apply `CIVTRACK_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BALLOTS_URL_ENV) {
            self.providers.ballots_base_url = url;
        }
        if let Ok(url) = std::env::var(SPARQL_URL_ENV) {
            self.providers.sparql_url = url;
        }
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
    }

    /// Reject values the sync engine cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("providers.ballots_base_url", &self.providers.ballots_base_url),
            ("providers.sparql_url", &self.providers.sparql_url),
        ] {
            reqwest::Url::parse(url)
                .map_err(|e| Error::Config(format!("{} is not a valid URL ({}): {}", name, url, e)))?;
        }

        if self.sync.request_timeout_secs == 0 {
            return Err(Error::Config("sync.request_timeout_secs must be > 0".to_string()));
        }
        if self.sync.death_date_batch_size == 0 {
            return Err(Error::Config("sync.death_date_batch_size must be > 0".to_string()));
        }
        if self.sync.delay_every == 0 || self.sync.progress_every == 0 {
            return Err(Error::Config(
                "sync.delay_every and sync.progress_every must be > 0".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(Error::Config("database.max_connections must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Root folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Create the root folder if missing and return the database path inside it
pub fn ensure_root_folder(root_folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root_folder)?;
    Ok(root_folder.join(DATABASE_FILE))
}

/// Default config file location (`~/.config/civtrack/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("civtrack").join("config.toml"))
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("civtrack"))
        .unwrap_or_else(|| PathBuf::from("./civtrack_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.request_timeout_secs, 30);
        assert_eq!(config.sync.max_redirects, 5);
        assert_eq!(config.sync.death_date_batch_size, 50);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [providers]
            ballots_base_url = "http://localhost:9000"

            [sync]
            item_delay_ms = 0
            "#
        )
        .unwrap();

        let config = TomlConfig::from_file(file.path()).unwrap();
        assert_eq!(config.providers.ballots_base_url, "http://localhost:9000");
        assert_eq!(config.sync.item_delay_ms, 0);
        assert_eq!(config.sync.progress_every, 50);
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut config = TomlConfig::default();
        config.providers.sparql_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = TomlConfig::default();
        config.sync.death_date_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = TomlConfig::load(Some(Path::new("/nonexistent/civtrack.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        std::env::set_var(BALLOTS_URL_ENV, "http://env.example:8080");
        let mut config = TomlConfig::default();
        config.apply_env_overrides();
        std::env::remove_var(BALLOTS_URL_ENV);

        assert_eq!(config.providers.ballots_base_url, "http://env.example:8080");
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        std::env::remove_var(ROOT_FOLDER_ENV);
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };

        assert_eq!(
            resolve_root_folder(Some(Path::new("/from/cli")), &config),
            PathBuf::from("/from/cli")
        );
        assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));

        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/env"));
        std::env::remove_var(ROOT_FOLDER_ENV);
    }
}
