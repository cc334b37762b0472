//! Client configuration.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// Default backend URL (local development stack).
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:54321";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend URL '{url}': {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Configuration for the Leadflow client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the hosted backend (auth + REST).
    pub backend_url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    /// SQLite file used for offline capture.
    pub local_db_path: PathBuf,
    /// File holding the persisted auth session.
    pub session_file: PathBuf,
}

impl ClientConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                | Default                              |
    /// |-------------------------|--------------------------------------|
    /// | `LEADFLOW_BACKEND_URL`  | `http://127.0.0.1:54321`             |
    /// | `LEADFLOW_ANON_KEY`     | empty                                |
    /// | `LEADFLOW_LOCAL_DB`     | `<data dir>/leadflow/local.db`       |
    /// | `LEADFLOW_SESSION_FILE` | `<data dir>/leadflow/session.json`   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            backend_url: non_empty("LEADFLOW_BACKEND_URL")
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.into()),
            anon_key: non_empty("LEADFLOW_ANON_KEY").unwrap_or_default(),
            local_db_path: non_empty("LEADFLOW_LOCAL_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir().join("local.db")),
            session_file: non_empty("LEADFLOW_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir().join("session.json")),
        }
    }

    /// Parsed backend URL, normalised to end with `/` so relative joins keep
    /// any path prefix.
    pub fn backend_base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.backend_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|source| ConfigError::InvalidBackendUrl {
            url: self.backend_url.clone(),
            source,
        })
    }
}

/// Per-user application data directory.
fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leadflow")
}
