//! Application configuration for kbmirror.
//!
//! User config lives at `~/.kbmirror/kbmirror.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KbMirrorError, Result};
use crate::types::Location;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbmirror.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbmirror";

// ---------------------------------------------------------------------------
// Config structs (matching kbmirror.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote document service.
    #[serde(default)]
    pub document_store: DocumentStoreConfig,

    /// Source record extractor.
    #[serde(default)]
    pub source: SourceConfig,

    /// Where ledgers are persisted.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Rate-limit retry policy for remote mutations.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Ticket examples appended to article documents.
    #[serde(default)]
    pub examples: ExamplesConfig,

    /// Article collections mirrored into the document store.
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// `[document_store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStoreConfig {
    /// Base URL of the documents API (create / get / batch edit).
    #[serde(default = "default_docs_base_url")]
    pub docs_base_url: String,

    /// Base URL of the files API (metadata / move / delete).
    #[serde(default = "default_files_base_url")]
    pub files_base_url: String,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_store_token_env")]
    pub token_env: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            docs_base_url: default_docs_base_url(),
            files_base_url: default_files_base_url(),
            token_env: default_store_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_docs_base_url() -> String {
    "https://docs.googleapis.com/v1".into()
}
fn default_files_base_url() -> String {
    "https://www.googleapis.com/drive/v3".into()
}
fn default_store_token_env() -> String {
    "KBMIRROR_DOCS_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Query endpoint of the record extractor.
    #[serde(default = "default_source_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the extractor's bearer token.
    #[serde(default = "default_source_token_env")]
    pub token_env: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Template for article links when a row carries none; `{id}` is replaced.
    #[serde(default = "default_article_url_template")]
    pub article_url_template: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_source_endpoint(),
            token_env: default_source_token_env(),
            timeout_secs: default_timeout_secs(),
            article_url_template: default_article_url_template(),
        }
    }
}

fn default_source_endpoint() -> String {
    "http://localhost:9090/query".into()
}
fn default_source_token_env() -> String {
    "KBMIRROR_SOURCE_TOKEN".into()
}
fn default_article_url_template() -> String {
    "https://support.example.com/kb/article?ID={id}".into()
}

/// `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// libSQL database file holding every ledger.
    #[serde(default = "default_ledger_db_path")]
    pub db_path: String,

    /// Namespace the ledgers live in.
    #[serde(default = "default_ledger_location")]
    pub location: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_ledger_db_path(),
            location: default_ledger_location(),
        }
    }
}

fn default_ledger_db_path() -> String {
    "~/.kbmirror/ledgers.db".into()
}
fn default_ledger_location() -> String {
    "default".into()
}

impl LedgerConfig {
    /// Ledger database path with a leading `~` expanded.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        expand_home(&self.db_path)
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per remote mutation (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed wait between attempts after a rate-limit reply.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_secs: default_wait_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_wait_secs() -> u64 {
    10
}

impl RetryConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

/// Which tickets make it into the rendered examples block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelFilter {
    /// Every ticket, whatever its cluster label.
    #[default]
    All,
    /// Only tickets that landed in a real cluster (label != -1).
    ClusteredOnly,
}

/// `[examples]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamplesConfig {
    /// Ticket query handed to the source extractor.
    #[serde(default)]
    pub query: String,

    /// Groups at or below this size are not clustered.
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,

    /// Upper bound on tickets considered per run.
    #[serde(default = "default_max_tickets")]
    pub max_tickets: usize,

    /// Sentinel opening the system-owned block.
    #[serde(default = "default_marker_start")]
    pub marker_start: String,

    /// Sentinel closing the system-owned block.
    #[serde(default = "default_marker_end")]
    pub marker_end: String,

    /// First line of the rendered block.
    #[serde(default = "default_heading")]
    pub heading: String,

    #[serde(default)]
    pub label_filter: LabelFilter,

    /// Collections whose ledgers are searched for document refs, in order.
    /// Empty means every configured collection.
    #[serde(default)]
    pub ledgers: Vec<String>,

    /// Clustering bridge command. Without it every ticket stays unclustered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_cmd: Option<String>,

    #[serde(default)]
    pub bridge_args: Vec<String>,
}

impl Default for ExamplesConfig {
    fn default() -> Self {
        Self {
            query: String::new(),
            min_group_size: default_min_group_size(),
            max_tickets: default_max_tickets(),
            marker_start: default_marker_start(),
            marker_end: default_marker_end(),
            heading: default_heading(),
            label_filter: LabelFilter::default(),
            ledgers: Vec::new(),
            bridge_cmd: None,
            bridge_args: Vec::new(),
        }
    }
}

fn default_min_group_size() -> usize {
    30
}
fn default_max_tickets() -> usize {
    25_000
}
fn default_marker_start() -> String {
    "[kbmirror:examples:start]".into()
}
fn default_marker_end() -> String {
    "[kbmirror:examples:end]".into()
}
fn default_heading() -> String {
    "Example Queries that use this article:".into()
}

/// `[[collections]]` entry: one source query mirrored into one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Human-readable name, used on the command line.
    pub name: String,
    /// Name of the ledger tracking this collection.
    pub ledger_name: String,
    /// Folder the mirrored documents must live in.
    pub target_location: String,
    /// Article query handed to the source extractor.
    pub query: String,
}

impl CollectionConfig {
    pub fn target(&self) -> Location {
        Location(self.target_location.clone())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbmirror/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KbMirrorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbmirror/kbmirror.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbMirrorError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        KbMirrorError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbMirrorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbMirrorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbMirrorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations the pipelines cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.retry.max_attempts == 0 {
        return Err(KbMirrorError::config("retry.max_attempts must be >= 1"));
    }

    let examples = &config.examples;
    if examples.marker_start.trim().is_empty() || examples.marker_end.trim().is_empty() {
        return Err(KbMirrorError::config("examples markers must not be empty"));
    }
    if examples.marker_start == examples.marker_end {
        return Err(KbMirrorError::config(
            "examples.marker_start and examples.marker_end must differ",
        ));
    }
    if examples.marker_start.contains(&examples.marker_end)
        || examples.marker_end.contains(&examples.marker_start)
    {
        return Err(KbMirrorError::config(
            "examples.marker_start and examples.marker_end must not contain each other",
        ));
    }
    if examples.heading.contains(&examples.marker_start)
        || examples.heading.contains(&examples.marker_end)
    {
        return Err(KbMirrorError::config("examples.heading must not contain a marker"));
    }

    let mut seen = HashSet::new();
    for collection in &config.collections {
        if !seen.insert(collection.name.as_str()) {
            return Err(KbMirrorError::config(format!(
                "duplicate collection name '{}'",
                collection.name
            )));
        }
        if collection.target_location.trim().is_empty() {
            return Err(KbMirrorError::config(format!(
                "collection '{}' has an empty target_location",
                collection.name
            )));
        }
    }

    for name in &examples.ledgers {
        if !seen.contains(name.as_str()) {
            return Err(KbMirrorError::config(format!(
                "examples.ledgers references unknown collection '{name}'"
            )));
        }
    }

    Ok(())
}

/// Check that the env var named by `var_name` is set and non-empty, returning its value.
pub fn read_token(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(KbMirrorError::config(format!(
            "access token not found. Set the {var_name} environment variable."
        ))),
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| KbMirrorError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("docs_base_url"));
        assert!(toml_str.contains("KBMIRROR_DOCS_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.max_attempts, 5);
        assert_eq!(parsed.examples.min_group_size, 30);
        assert_eq!(parsed.examples.label_filter, LabelFilter::All);
    }

    #[test]
    fn config_with_collections() {
        let toml_str = r#"
[retry]
max_attempts = 3
wait_secs = 1

[examples]
label_filter = "clustered-only"
ledgers = ["public"]

[[collections]]
name = "public"
ledger_name = "Public Tracking"
target_location = "folder-public"
query = "status = published AND public"

[[collections]]
name = "staff"
ledger_name = "Support Staff Tracking"
target_location = "folder-staff"
query = "status = published AND NOT public"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        validate_config(&config).expect("valid");
        assert_eq!(config.collections.len(), 2);
        assert_eq!(config.collections[1].target(), Location::from("folder-staff"));
        assert_eq!(config.examples.label_filter, LabelFilter::ClusteredOnly);
        assert_eq!(config.retry.wait(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_duplicate_collections() {
        let toml_str = r#"
[[collections]]
name = "public"
ledger_name = "a"
target_location = "f1"
query = "q"

[[collections]]
name = "public"
ledger_name = "b"
target_location = "f2"
query = "q"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate collection name"));
    }

    #[test]
    fn rejects_identical_markers_and_zero_attempts() {
        let mut config = AppConfig::default();
        config.examples.marker_end = config.examples.marker_start.clone();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_markers_leaking_into_the_block() {
        let mut config = AppConfig::default();
        config.examples.marker_start = "[ex]".into();
        config.examples.marker_end = "[ex]end".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("contain each other"));

        let mut config = AppConfig::default();
        config.examples.heading = format!("Examples {}", config.examples.marker_end);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("heading"));
    }

    #[test]
    fn rejects_unknown_example_ledger() {
        let mut config = AppConfig::default();
        config.examples.ledgers = vec!["missing".into()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown collection"));
    }

    #[test]
    fn token_validation() {
        // Use a unique env var name to avoid interfering with other tests
        let result = read_token("KBM_TEST_NONEXISTENT_TOKEN_12345");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("token not found"));
    }

    #[test]
    fn relative_db_path_is_untouched() {
        let ledger = LedgerConfig {
            db_path: "var/ledgers.db".into(),
            location: "default".into(),
        };
        assert_eq!(ledger.resolved_db_path().expect("path"), PathBuf::from("var/ledgers.db"));
    }
}
