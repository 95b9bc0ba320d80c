use std::path::PathBuf;

use thiserror::Error;
use url::Url;

pub const APP_NAME: &str = "Hearth";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:1b";
pub const DEFAULT_TITLE_MODEL: &str = "llama3.2:1b";
pub const NEW_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid endpoint URL {url:?}: {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Cannot determine a data directory; set HEARTH_DB or HOME")]
    NoDataDir,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub db_path: PathBuf,
    pub default_model: String,
    /// `None` disables automatic titles.
    pub title_model: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_endpoint = non_empty("HEARTH_ENDPOINT")
            .or_else(|| non_empty("OLLAMA_HOST"))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = parse_endpoint(&raw_endpoint)?;

        let db_path = match non_empty("HEARTH_DB") {
            Some(path) => PathBuf::from(path),
            None => default_db_path(&non_empty)?,
        };

        Ok(Config {
            endpoint,
            db_path,
            default_model: non_empty("HEARTH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            title_model: Some(
                non_empty("HEARTH_TITLE_MODEL").unwrap_or_else(|| DEFAULT_TITLE_MODEL.to_string()),
            ),
        })
    }
}

/// Accepts bare `host:port` the way `OLLAMA_HOST` is commonly set.
pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    Url::parse(&with_scheme).map_err(|source| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        source,
    })
}

fn default_db_path<F>(lookup: &F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let data_dir = match lookup("XDG_DATA_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let home = lookup("HOME").ok_or(ConfigError::NoDataDir)?;
            PathBuf::from(home).join(".local/share")
        }
    };
    Ok(data_dir.join("hearth").join("hearth.db"))
}
