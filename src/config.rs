use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const CONFIG_FILE: &str = "autonomo.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Derived from `api_url` (http → ws, https → wss) when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

impl ServerConfig {
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn ws_base(&self) -> Result<String> {
        if let Some(ws) = &self.ws_url {
            return Ok(ws.trim_end_matches('/').to_string());
        }
        let mut url = Url::parse(self.api_base())
            .with_context(|| format!("Invalid api_url: {}", self.api_url))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot derive WebSocket URL from {}", self.api_url))?;
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    pub fn load_with_path() -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = Vec::new();

        if let Ok(explicit) = std::env::var("AUTONOMO_CONFIG") {
            candidates.push(PathBuf::from(explicit));
        }

        candidates.push(PathBuf::from(CONFIG_FILE));

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("autonomo").join(CONFIG_FILE));
        }

        candidates.push(crate::paths::config_dir().join(CONFIG_FILE));

        for path in candidates {
            if path.exists() {
                let config = Self::load_from(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(self.server.api_base())
            .with_context(|| format!("Invalid server.api_url: {}", self.server.api_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            anyhow::bail!(
                "server.api_url must start with http:// or https://, got: {}",
                self.server.api_url
            );
        }
        let ws_base = self.server.ws_base()?;
        let ws = Url::parse(&ws_base)
            .with_context(|| format!("Invalid server.ws_url: {}", ws_base))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            anyhow::bail!(
                "server.ws_url must start with ws:// or wss://, got: {}",
                ws_base
            );
        }
        if self.server.connect_timeout_secs == 0 {
            anyhow::bail!("server.connect_timeout_secs must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.api_base(), "http://localhost:8000");
        assert_eq!(config.server.ws_base().unwrap(), "ws://localhost:8000");
        assert_eq!(config.server.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            api_url = "https://agent.example.com/"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.api_base(), "https://agent.example.com");
        assert_eq!(config.server.ws_base().unwrap(), "wss://agent.example.com");
        assert_eq!(config.server.connect_timeout_secs, 5);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_explicit_ws_url_wins() {
        let mut config = Config::default();
        config.server.ws_url = Some("ws://10.0.0.2:9000/".to_string());
        assert_eq!(config.server.ws_base().unwrap(), "ws://10.0.0.2:9000");
    }

    #[test]
    fn test_validate_rejects_bad_schemes() {
        let mut config = Config::default();
        config.server.api_url = "ftp://localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.ws_url = Some("http://localhost:8000".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, "[server]\nconnect_timeout_secs = 12\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.connect_timeout_secs, 12);
        assert_eq!(config.server.api_url, "http://localhost:8000");
    }
}
