use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::client::DashboardError;

pub const DEFAULT_CONFIG_FILE: &str = "instance-desk.toml";
const ENV_PREFIX: &str = "DESK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Backend root, including the `/api` blueprint prefix.
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
    /// Directory of the local key/value store (active API key).
    pub storage_path: PathBuf,
    /// Where instance CSV exports are written.
    pub export_dir: PathBuf,
    /// Raw `Cookie` header value for the backend session.
    pub session_cookie: Option<String>,
    /// Account id sent with `/save_instance`.
    pub user_id: Option<String>,
    /// Tracing filter directive, e.g. `instance_desk=debug`.
    pub log_filter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            request_timeout_secs: 30,
            requests_per_second: 5,
            storage_path: PathBuf::from(".instance-desk"),
            export_dir: PathBuf::from("."),
            session_cookie: None,
            user_id: None,
            log_filter: None,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file if present, then `.env` and `DESK_*`
    /// environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DashboardError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", env_file.display());
        }
        Self::from_sources(path.as_ref(), None)
    }

    /// Layers the file and the `DESK_*` variables over the defaults. `env`
    /// replaces the process environment when given.
    fn from_sources(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self, DashboardError> {
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let settings: Settings = built.try_deserialize()?;
        settings.validate().map_err(|errors| DashboardError::Config(errors.join(", ")))?;

        info!("Backend: {}", settings.base_url);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.base_url.trim().is_empty() {
            errors.push("base_url must not be empty".to_string());
        } else if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push("base_url must start with http:// or https://".to_string());
        }
        if self.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be > 0".to_string());
        }
        if self.requests_per_second == 0 {
            errors.push("requests_per_second must be > 0".to_string());
        }
        if self.storage_path.as_os_str().is_empty() {
            errors.push("storage_path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String, DashboardError> {
        toml::to_string_pretty(self).map_err(|e| DashboardError::Config(e.to_string()))
    }
}
