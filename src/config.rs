use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use stillwell_core::SyncSettings;

/// Where a configuration value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Default => "default",
            ConfigSource::File => "file",
            ConfigSource::Environment => "environment",
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved value tagged with the layer that set it
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn default_of(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }

    /// Replaces the value when a higher-priority layer provides one.
    fn overlay(&mut self, value: Option<T>, source: ConfigSource) {
        if let Some(value) = value {
            *self = Self::new(value, source);
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize)]
pub struct SyncConfig {
    /// Server URL (e.g. "https://api.stillwell.app")
    pub server_url: ConfigValue<Option<String>>,
    /// Bearer token for the sync API
    #[serde(serialize_with = "serialize_masked")]
    pub api_key: ConfigValue<Option<String>>,
    /// Engine tunables
    pub settings: ConfigValue<SyncSettings>,
}

impl SyncConfig {
    /// Returns true if sync is configured (has both server_url and api_key)
    pub fn is_configured(&self) -> bool {
        self.server_url.value.is_some() && self.api_key.value.is_some()
    }

    /// First characters of the API key, for display.
    pub fn masked_key(&self) -> Option<String> {
        self.api_key.value.as_deref().map(mask)
    }
}

fn mask(key: &str) -> String {
    let shown: String = key.chars().take(8).collect();
    format!("{}...", shown)
}

fn serialize_masked<S: Serializer>(
    key: &ConfigValue<Option<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    ConfigValue::new(key.value.as_deref().map(mask), key.source).serialize(serializer)
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the queue and record documents
    pub data_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

/// On-disk shape; every key is optional
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    sync: Option<SyncFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SyncFile {
    server_url: Option<String>,
    api_key: Option<String>,
    settings: Option<SyncSettings>,
}

impl Config {
    /// Resolves every value: environment, then config file, then defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut data_dir = ConfigValue::default_of(Self::default_data_dir());
        let mut server_url = ConfigValue::default_of(None);
        let mut api_key = ConfigValue::default_of(None);
        let mut settings = ConfigValue::default_of(SyncSettings::default());

        let path = config_path.unwrap_or_else(Self::default_config_path);
        let config_file = match Self::read_file(&path)? {
            Some(file) => {
                let base = path.parent().map(PathBuf::from).unwrap_or_default();
                data_dir.overlay(
                    file.data_dir.map(|dir| if dir.is_relative() { base.join(dir) } else { dir }),
                    ConfigSource::File,
                );
                let sync = file.sync.unwrap_or_default();
                server_url.overlay(sync.server_url.map(Some), ConfigSource::File);
                api_key.overlay(sync.api_key.map(Some), ConfigSource::File);
                settings.overlay(sync.settings, ConfigSource::File);
                Some(path)
            }
            None => None,
        };

        let env = |name: &str| std::env::var(name).ok();
        data_dir.overlay(env("STILLWELL_DATA_DIR").map(PathBuf::from), ConfigSource::Environment);
        server_url.overlay(env("STILLWELL_SYNC_URL").map(Some), ConfigSource::Environment);
        api_key.overlay(env("STILLWELL_SYNC_API_KEY").map(Some), ConfigSource::Environment);

        Ok(Self {
            data_dir,
            config_file,
            sync: SyncConfig {
                server_url,
                api_key,
                settings,
            },
        })
    }

    fn read_file(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// `stillwell/` under the platform config directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stillwell")
    }

    /// `stillwell/` under the platform data directory (e.g.
    /// `~/.local/share/stillwell` on Linux).
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stillwell")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config in {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}
