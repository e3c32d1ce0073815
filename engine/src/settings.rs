use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model_store::ModelIdentity;

pub const DEFAULT_REPO_ID: &str = "syvai/hviske-v2";
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

const APP_DIR_NAME: &str = "sludre";
const SETTINGS_FILE: &str = "settings.json";
const TOKEN_ENV_VARS: &[&str] = &["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];
const ENDPOINT_ENV: &str = "HF_ENDPOINT";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub model_repo_id: String,
    pub model_cache_dir: Option<PathBuf>,
    pub manual_model_path: Option<String>,
    pub hf_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_repo_id: DEFAULT_REPO_ID.to_string(),
            model_cache_dir: None,
            manual_model_path: None,
            hf_token: None,
        }
    }
}

impl Settings {
    /// Builds the acquisition identity, filling the cache root and token from
    /// platform defaults and the environment when the file leaves them unset.
    pub fn identity(&self) -> ModelIdentity {
        let cache_root = self
            .model_cache_dir
            .clone()
            .unwrap_or_else(default_cache_root);

        let mut identity = ModelIdentity::new(self.model_repo_id.trim(), cache_root);

        if let Some(manual) = non_blank(self.manual_model_path.as_deref()) {
            identity = identity.with_manual_path(expand_home(manual));
        }

        let token = non_blank(self.hf_token.as_deref())
            .map(str::to_string)
            .or_else(token_from_env);
        if let Some(token) = token {
            identity = identity.with_access_token(token);
        }

        identity
    }
}

pub fn default_settings_path() -> PathBuf {
    dirs_next::config_dir()
        .or_else(dirs_next::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(SETTINGS_FILE)
}

pub fn default_cache_root() -> PathBuf {
    dirs_next::cache_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join("models")
}

/// A missing file yields the defaults; a malformed one is an error.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        log::info!(
            "No settings file at {}; using defaults",
            path.display()
        );
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn hub_endpoint() -> String {
    std::env::var(ENDPOINT_ENV)
        .ok()
        .and_then(|value| non_blank(Some(value.as_str())).map(|v| v.trim_end_matches('/').to_string()))
        .unwrap_or_else(|| DEFAULT_HUB_ENDPOINT.to_string())
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn token_from_env() -> Option<String> {
    TOKEN_ENV_VARS.iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .and_then(|value| non_blank(Some(value.as_str())).map(str::to_string))
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
