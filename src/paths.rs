use std::path::PathBuf;
use std::sync::OnceLock;

static AUTONOMO_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the Autonomo home directory (`~/.autonomo/`).
/// Supports `$AUTONOMO_HOME` env override. Cached via `OnceLock`.
pub fn autonomo_home() -> &'static PathBuf {
    AUTONOMO_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("AUTONOMO_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autonomo")
    })
}

/// `~/.autonomo/config/`
pub fn config_dir() -> PathBuf {
    autonomo_home().join("config")
}

/// `~/.autonomo/logs/`
pub fn logs_dir() -> PathBuf {
    autonomo_home().join("logs")
}

/// `~/.autonomo/credentials.json`
pub fn credentials_file() -> PathBuf {
    autonomo_home().join("credentials.json")
}
