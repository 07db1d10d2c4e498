use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Providers whose keys the backend accepts in `api_keys`.
pub const KEYED_PROVIDERS: &[&str] = &["openai", "anthropic", "deepseek"];

// ---------------------------------------------------------------------------
// Persisted format: ~/.autonomo/credentials.json
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Credentials {
    /// Keyed by provider name (e.g. "openai", "deepseek").
    #[serde(flatten)]
    pub keys: BTreeMap<String, String>,
}

impl Credentials {
    /// Load from disk. Returns empty if missing or invalid.
    pub fn load(file: &Path) -> Self {
        if !file.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(file) {
            Ok(content) => match serde_json::from_str::<Credentials>(&content) {
                Ok(creds) => creds,
                Err(e) => {
                    warn!("Failed to parse credentials.json: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read credentials.json: {}", e);
                Self::default()
            }
        }
    }

    /// Save to disk. Creates parent directories if needed.
    pub fn save(&self, file: &Path) -> anyhow::Result<()> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(file, json)?;
        Ok(())
    }

    pub fn get_api_key(&self, provider: &str) -> Option<&str> {
        self.keys.get(&normalize(provider)).map(String::as_str)
    }

    /// Set the API key for a provider. An empty key removes the entry.
    pub fn set_api_key(&mut self, provider: &str, api_key: &str) {
        let provider = normalize(provider);
        let api_key = api_key.trim();
        if api_key.is_empty() {
            self.keys.remove(&provider);
        } else {
            self.keys.insert(provider, api_key.to_string());
        }
    }

    /// Return a copy with all keys redacted (for display).
    pub fn redacted(&self) -> Self {
        let keys = self
            .keys
            .keys()
            .map(|provider| (provider.clone(), "***".to_string()))
            .collect();
        Self { keys }
    }

    /// Effective key per provider: stored key first, then
    /// `AUTONOMO_API_KEY_<PROVIDER>` from the environment.
    pub fn resolved_api_keys(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for provider in KEYED_PROVIDERS {
            if let Some(key) = resolve_api_key(provider, self) {
                out.insert(provider.to_string(), key);
            }
        }
        out
    }
}

fn normalize(provider: &str) -> String {
    provider.trim().to_lowercase()
}

pub fn resolve_api_key(provider: &str, credentials: &Credentials) -> Option<String> {
    if let Some(key) = credentials.get_api_key(provider) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    let env_name = format!(
        "AUTONOMO_API_KEY_{}",
        provider.trim().to_uppercase().replace('-', "_")
    );
    match std::env::var(&env_name) {
        Ok(key) if !key.is_empty() => Some(key),
        _ => None,
    }
}
