//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Environment variable overriding `server.base_url`.
pub const SERVER_URL_ENV: &str = "TRAMAGRID_SERVER_URL";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request transport timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            user_agent: None,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the last-known session id is persisted (default: `~/.tramagrid/session.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "tramagrid_client=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl ClientConfig {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::TramaGridError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: ClientConfig = json5::from_str(&substituted)
            .map_err(|e| crate::error::TramaGridError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Server base URL: `TRAMAGRID_SERVER_URL` wins over the file, which wins
    /// over the built-in default. Trailing slashes are stripped.
    pub fn base_url(&self) -> String {
        let url = std::env::var(SERVER_URL_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.server.as_ref().map(|s| s.base_url.clone()))
            .unwrap_or_else(default_base_url);
        url.trim_end_matches('/').to_string()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.server
            .as_ref()
            .map(|s| s.timeout_ms)
            .unwrap_or_else(default_timeout_ms)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.user_agent.as_deref())
    }

    pub fn session_store_path(&self) -> PathBuf {
        self.session
            .as_ref()
            .and_then(|s| s.store_path.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("session.json"))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            let url = server.base_url.trim();
            if url.is_empty() {
                errors.push("server.base_url cannot be empty".to_string());
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(format!(
                    "server.base_url must be an http(s) URL, got '{url}'"
                ));
            } else if url.starts_with("http://")
                && !url.contains("127.0.0.1")
                && !url.contains("localhost")
            {
                warnings.push(format!("server.base_url '{url}' is not using TLS"));
            }

            if server.timeout_ms == 0 {
                errors.push("server.timeout_ms cannot be 0".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                warnings.push(format!(
                    "Unknown logging.format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for TramaGrid client data: `~/.tramagrid/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tramagrid")
}
