use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default, then overridden by the
/// environment variables the hosting platform injects (see [`apply_env`]).
///
/// [`apply_env`]: ParleyConfig::apply_env
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Empty values are ignored so that an exported-but-blank variable does
    /// not wipe a configured value.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CONVERSATION_INDEX_TABLE") {
            self.storage.index_table = v;
        }
        if let Some(v) = get("CONVERSATION_TABLE") {
            self.storage.conversation_table = v;
        }
        if let Some(v) = get("S3_ARTIFACT_BUCKET_NAME") {
            self.storage.artifact_bucket = v;
        }
        if let Some(v) = get("KENDRA_INDEX_ID") {
            self.retrieval.index_id = v;
        }
        if let Some(v) = get("AWS_REGION") {
            self.general.region = v;
        }
        if let Some(v) = get("PARLEY_RETRIEVAL_ENDPOINT") {
            self.retrieval.endpoint = Some(v);
        }
        if let Some(v) = get("PARLEY_MODEL_ENDPOINT") {
            self.model.endpoint = Some(v);
        }
        if let Some(v) = get("PARLEY_MODEL_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("PARLEY_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.general.port = port,
                Err(_) => warn!(value = %v, "Ignoring invalid PARLEY_PORT"),
            }
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("storage.index_table", &self.storage.index_table)?;
        validate_identifier("storage.conversation_table", &self.storage.conversation_table)?;
        if self.storage.index_table == self.storage.conversation_table {
            return Err(ParleyError::Config(
                "storage.index_table and storage.conversation_table must differ".to_string(),
            ));
        }
        if self.retrieval.page_size == 0 || self.retrieval.page_size > 100 {
            return Err(ParleyError::Config(format!(
                "retrieval.page_size must be between 1 and 100, got {}",
                self.retrieval.page_size
            )));
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ParleyError::Config(format!(
                "model.temperature must be between 0.0 and 1.0, got {}",
                self.model.temperature
            )));
        }
        if self.model.max_tokens == 0 {
            return Err(ParleyError::Config(
                "model.max_tokens must be positive".to_string(),
            ));
        }
        if self.session.max_advance_attempts == 0 {
            return Err(ParleyError::Config(
                "session.max_advance_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL of the document search service.
    pub fn retrieval_endpoint(&self) -> String {
        match &self.retrieval.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://kendra.{}.amazonaws.com", self.general.region),
        }
    }

    /// Base URL of the model runtime.
    pub fn model_endpoint(&self) -> String {
        match &self.model.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://bedrock-runtime.{}.amazonaws.com",
                self.general.region
            ),
        }
    }
}

/// Table names are spliced into SQL, so only plain identifiers are allowed.
fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ParleyError::Config(format!(
            "{} must be a plain identifier ([A-Za-z_][A-Za-z0-9_]*), got '{}'",
            field, value
        )))
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and API token.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for the dialog endpoint.
    pub port: u16,
    /// Cloud region used to derive default service endpoints.
    pub region: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
            region: "ap-southeast-2".to_string(),
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub database_file: String,
    /// Table holding one turn-index row per user.
    pub index_table: String,
    /// Table holding the per-session conversation logs.
    pub conversation_table: String,
    /// Bucket holding uploaded source documents.
    pub artifact_bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "parley.db".to_string(),
            index_table: "conversation_index".to_string(),
            conversation_table: "conversation_log".to_string(),
            artifact_bucket: String::new(),
        }
    }
}

/// Session index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Compare-and-swap attempts before a turn advance gives up.
    pub max_advance_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_advance_attempts: 5,
        }
    }
}

/// What the orchestrator does when the search index cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// Answer with the apology text and skip the model call.
    #[default]
    Apologize,
    /// Ask the model anyway, with no retrieved context.
    EmptyContext,
}

/// Document search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Identifier of the search index to query.
    pub index_id: String,
    /// Override for the search service base URL.
    pub endpoint: Option<String>,
    /// Results requested from the first (and only) page.
    pub page_size: u32,
    /// Behaviour when the search call fails.
    pub on_failure: RetrievalFailurePolicy,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_id: String::new(),
            endpoint: None,
            page_size: 5,
            on_failure: RetrievalFailurePolicy::Apologize,
            timeout_secs: 30,
        }
    }
}

/// Hosted model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_id: String,
    pub anthropic_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Override for the model runtime base URL.
    pub endpoint: Option<String>,
    /// Bearer key sent to the model runtime, if it requires one.
    pub api_key: Option<String>,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            anthropic_version: "bedrock-2023-05-31".to_string(),
            max_tokens: 3500,
            temperature: 0.4,
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Fixed bearer token. When unset, one is loaded from or generated into
    /// the data directory.
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ParleyConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.index_table, "conversation_index");
        assert_eq!(config.storage.conversation_table, "conversation_log");
        assert_eq!(config.retrieval.page_size, 5);
        assert_eq!(config.retrieval.on_failure, RetrievalFailurePolicy::Apologize);
        assert_eq!(config.model.max_tokens, 3500);
        assert!((config.model.temperature - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.model.anthropic_version, "bedrock-2023-05-31");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[retrieval]
index_id = "idx-123"
on_failure = "empty_context"

[general]
log_level = "debug"
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.retrieval.index_id, "idx-123");
        assert_eq!(config.retrieval.on_failure, RetrievalFailurePolicy::EmptyContext);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.retrieval.page_size, 5);
        assert_eq!(config.model.max_tokens, 3500);
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let file = create_temp_config("[general\nport = ");
        assert!(matches!(
            ParleyConfig::load(file.path()),
            Err(ParleyError::Config(_))
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ParleyConfig::load_or_default(Path::new("/nonexistent/parley.toml"));
        assert_eq!(config.general.data_dir, "~/.parley/data");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ParleyConfig::default();
        config.retrieval.index_id = "idx-9".to_string();
        config.save(&path).unwrap();

        let reloaded = ParleyConfig::load(&path).unwrap();
        assert_eq!(reloaded.retrieval.index_id, "idx-9");
        assert_eq!(reloaded.storage.index_table, config.storage.index_table);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONVERSATION_INDEX_TABLE", "idx_table"),
            ("CONVERSATION_TABLE", "log_table"),
            ("S3_ARTIFACT_BUCKET_NAME", "docs-bucket"),
            ("KENDRA_INDEX_ID", "kendra-1"),
            ("AWS_REGION", "us-east-1"),
            ("PARLEY_PORT", "8080"),
        ]
        .into_iter()
        .collect();

        let mut config = ParleyConfig::default();
        config.apply_env_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.index_table, "idx_table");
        assert_eq!(config.storage.conversation_table, "log_table");
        assert_eq!(config.storage.artifact_bucket, "docs-bucket");
        assert_eq!(config.retrieval.index_id, "kendra-1");
        assert_eq!(config.general.region, "us-east-1");
        assert_eq!(config.general.port, 8080);
        assert_eq!(
            config.retrieval_endpoint(),
            "https://kendra.us-east-1.amazonaws.com"
        );
        assert_eq!(
            config.model_endpoint(),
            "https://bedrock-runtime.us-east-1.amazonaws.com"
        );
    }

    #[test]
    fn test_env_blank_and_invalid_values_ignored() {
        let mut config = ParleyConfig::default();
        config.apply_env_from(|k| match k {
            "CONVERSATION_TABLE" => Some("   ".to_string()),
            "PARLEY_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.conversation_table, "conversation_log");
        assert_eq!(config.general.port, 3040);
    }

    #[test]
    fn test_endpoint_override_trims_trailing_slash() {
        let mut config = ParleyConfig::default();
        config.model.endpoint = Some("http://localhost:9000/".to_string());
        assert_eq!(config.model_endpoint(), "http://localhost:9000");
    }

    #[test]
    fn test_validate_rejects_bad_table_names() {
        let mut config = ParleyConfig::default();
        config.storage.index_table = "index; DROP TABLE x".to_string();
        assert!(config.validate().is_err());

        let mut config = ParleyConfig::default();
        config.storage.conversation_table = "9logs".to_string();
        assert!(config.validate().is_err());

        let mut config = ParleyConfig::default();
        config.storage.conversation_table = config.storage.index_table.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = ParleyConfig::default();
        config.model.temperature = 1.5;
        assert!(config.validate().is_err());

        let mut config = ParleyConfig::default();
        config.retrieval.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = ParleyConfig::default();
        config.session.max_advance_attempts = 0;
        assert!(config.validate().is_err());
    }
}
