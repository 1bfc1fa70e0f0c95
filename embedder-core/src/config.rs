use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{Secret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::artifact::LocateMode;
use crate::error::{ConfigError, Result};

pub const APP_DIR_NAME: &str = "discord-embedder";
pub const CREDENTIALS_FILE: &str = "config.env";
pub const SETTINGS_FILE: &str = "embedder.toml";

pub const TOKEN_KEY: &str = "DISCORD_TOKEN";
pub const APPLICATION_ID_KEY: &str = "DISCORD_APPLICATION_ID";

/// Runtime settings read from `embedder.toml`. Every field has a default so a
/// missing file behaves like the stock layout: artifacts in the current
/// directory, cookies under `./cookies`, tools resolved from `PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathsSection,
    pub tools: ToolsSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub work_dir: PathBuf,
    pub cookies_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            cookies_dir: PathBuf::from("cookies"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub timeout_secs: Option<u64>,
}

impl ToolsSection {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub locate_mode: LocateMode,
}

/// Bot credentials. Values in the process environment take precedence over
/// the ones stored in `config.env`.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: SecretString,
    pub application_id: u64,
}

/// `<user config dir>/discord-embedder`
pub fn config_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join(APP_DIR_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Creates the config directory and an empty `config.env` when they do not
/// exist yet, returning the path of the env file.
pub fn ensure_credentials_file<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        source,
        path: dir.to_path_buf(),
    })?;
    let path = dir.join(CREDENTIALS_FILE);
    if !path.exists() {
        fs::File::create(&path).map_err(|source| ConfigError::Io {
            source,
            path: path.clone(),
        })?;
    }
    Ok(path)
}

pub fn load_credentials<P: AsRef<Path>>(path: P) -> Result<Credentials> {
    let path = path.as_ref();
    let entries = dotenvy::from_path_iter(path).map_err(|source| ConfigError::Env {
        source,
        path: path.to_path_buf(),
    })?;
    let mut values = HashMap::new();
    for entry in entries {
        let (key, value) = entry.map_err(|source| ConfigError::Env {
            source,
            path: path.to_path_buf(),
        })?;
        values.insert(key, value);
    }
    credentials_from_sources(&values, |key| std::env::var(key).ok())
}

pub fn credentials_from_sources<F>(file: &HashMap<String, String>, env: F) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        env(key)
            .or_else(|| file.get(key).cloned())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let token = lookup(TOKEN_KEY).ok_or(ConfigError::Missing(TOKEN_KEY))?;
    let application_id = lookup(APPLICATION_ID_KEY)
        .ok_or(ConfigError::Missing(APPLICATION_ID_KEY))?
        .parse::<u64>()
        .map_err(|err| ConfigError::Invalid {
            key: APPLICATION_ID_KEY,
            reason: err.to_string(),
        })?;
    if application_id == 0 {
        return Err(ConfigError::Invalid {
            key: APPLICATION_ID_KEY,
            reason: "must be a non-zero snowflake".into(),
        });
    }

    Ok(Credentials {
        token: Secret::new(token),
        application_id,
    })
}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    load_toml(path)
}

/// Like [`load_settings`], but a missing file yields the defaults.
pub fn load_settings_or_default<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    if path.exists() {
        load_settings(path)
    } else {
        Ok(Settings::default())
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
