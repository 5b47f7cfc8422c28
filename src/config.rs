use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::persistence::{get_data_dir, AuditLog, JsonLinesRecordLog, SqliteRecordLog};
use crate::session::{FileSessionStore, MemorySessionStore, SessionStore};
use crate::tools::ToolDefinition;

pub const API_KEY_ENV: &str = "RELAYCHAT_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionStoreConfig {
    File { dir: PathBuf },
    Memory,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        SessionStoreConfig::File {
            dir: get_data_dir().join("sessions"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditLogConfig {
    Sqlite { path: PathBuf },
    JsonLines { path: PathBuf },
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        AuditLogConfig::Sqlite {
            path: get_data_dir().join("records.db"),
        }
    }
}

fn default_scripts_root() -> PathBuf {
    PathBuf::from("./scripts")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub select_api: String,
    #[serde(default)]
    pub apis: HashMap<String, ApiConfig>,
    #[serde(default)]
    pub sys_prompt: String,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub audit_log: AuditLogConfig,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default = "default_scripts_root")]
    pub scripts_root: PathBuf,
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("relaychat")
            .join("config.json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// The selected endpoint, with the key taken from the environment when set.
    pub fn active_api(&self) -> Result<ApiConfig> {
        self.resolve_api(env::var(API_KEY_ENV).ok())
    }

    fn resolve_api(&self, key_override: Option<String>) -> Result<ApiConfig> {
        let mut api = self.apis.get(&self.select_api).cloned().with_context(|| {
            format!(
                "select_api {:?} does not name an entry in apis",
                self.select_api
            )
        })?;

        if let Some(key) = key_override.filter(|k| !k.is_empty()) {
            api.api_key = key;
        }
        Ok(api)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn session_store(&self) -> SessionStore {
        match &self.session_store {
            SessionStoreConfig::File { dir } => SessionStore::File(FileSessionStore::new(dir)),
            SessionStoreConfig::Memory => SessionStore::Memory(MemorySessionStore::new()),
        }
    }

    pub fn audit_log(&self) -> Result<AuditLog> {
        Ok(match &self.audit_log {
            AuditLogConfig::Sqlite { path } => AuditLog::Sqlite(SqliteRecordLog::open(path)?),
            AuditLogConfig::JsonLines { path } => {
                AuditLog::JsonLines(JsonLinesRecordLog::new(path))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "select_api": "local",
        "apis": {
            "local": {
                "model": "qwen",
                "api_key": "file-key",
                "api_url": "http://localhost:8000/v1/chat/completions"
            }
        },
        "sys_prompt": "You are terse.",
        "session_store": {"kind": "memory"},
        "audit_log": {"kind": "json_lines", "path": "records.jsonl"},
        "tools": [
            {
                "type": "function",
                "function": {
                    "name": "weather",
                    "description": "Current weather",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                },
                "script": "weather.sh"
            }
        ],
        "tool_timeout_secs": 30
    }"#;

    fn write_sample(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&write_sample(&dir)).unwrap();

        assert_eq!(config.select_api, "local");
        assert_eq!(config.sys_prompt, "You are terse.");
        assert_eq!(config.session_store, SessionStoreConfig::Memory);
        assert_eq!(
            config.audit_log,
            AuditLogConfig::JsonLines {
                path: PathBuf::from("records.jsonl")
            }
        );
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].name(), "weather");
        assert_eq!(config.tools[0].script, "weather.sh");
        assert_eq!(config.scripts_root, PathBuf::from("./scripts"));
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_defaults_for_minimal_config() {
        let config: AppConfig = serde_json::from_str(
            r#"{"select_api": "a", "apis": {"a": {"model": "m", "api_url": "http://x"}}}"#,
        )
        .unwrap();

        assert!(config.tools.is_empty());
        assert!(config.tool_timeout().is_none());
        assert!(matches!(config.session_store, SessionStoreConfig::File { .. }));
        assert!(matches!(config.audit_log, AuditLogConfig::Sqlite { .. }));
        assert_eq!(config.resolve_api(None).unwrap().api_key, "");
    }

    #[test]
    fn test_key_override() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&write_sample(&dir)).unwrap();

        assert_eq!(config.resolve_api(None).unwrap().api_key, "file-key");
        assert_eq!(
            config.resolve_api(Some(String::new())).unwrap().api_key,
            "file-key"
        );
        let api = config.resolve_api(Some("env-key".to_string())).unwrap();
        assert_eq!(api.api_key, "env-key");
        assert_eq!(api.model, "qwen");
    }

    #[test]
    fn test_unknown_select_api() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::load(&write_sample(&dir)).unwrap();
        config.select_api = "missing".to_string();

        let err = config.resolve_api(None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(AppConfig::load(&dir.path().join("nope.json")).is_err());
    }

    #[tokio::test]
    async fn test_builds_backends() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::load(&write_sample(&dir)).unwrap();
        config.audit_log = AuditLogConfig::Sqlite {
            path: dir.path().join("db/records.db"),
        };
        config.session_store = SessionStoreConfig::File {
            dir: dir.path().join("sessions"),
        };

        assert!(matches!(config.audit_log().unwrap(), AuditLog::Sqlite(_)));
        assert!(matches!(config.session_store(), SessionStore::File(_)));
        assert!(dir.path().join("db/records.db").exists());
    }
}
