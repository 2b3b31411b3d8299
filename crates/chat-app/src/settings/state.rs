use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_llm::{DEFAULT_BASE_URL, ProviderConfig};
use parley_storage::BackendConfig;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::persist::{PersistError, write_json_atomically};

pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PARLEY_";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Backend project root, e.g. `https://<project>.supabase.co`.
    #[serde(default)]
    pub backend_url: String,
    #[serde(default)]
    pub backend_anon_key: String,
    #[serde(default = "default_inference_base_url")]
    pub inference_base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where caches and the auth file live; the config directory when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            backend_anon_key: String::new(),
            inference_base_url: default_inference_base_url(),
            log_level: default_log_level(),
            data_dir: None,
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.backend_url = self.backend_url.trim().trim_end_matches('/').to_string();
        self.backend_anon_key = self.backend_anon_key.trim().to_string();
        self.inference_base_url = if self.inference_base_url.trim().is_empty() {
            default_inference_base_url()
        } else {
            self.inference_base_url.trim().to_string()
        };
        self.log_level = if self.log_level.trim().is_empty() {
            default_log_level()
        } else {
            self.log_level.trim().to_string()
        };
        self.data_dir = self
            .data_dir
            .filter(|path| !path.as_os_str().is_empty());
        self
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.backend_url, &self.backend_anon_key)
    }

    pub fn provider_config(
        &self,
        provider_id: &str,
        api_key: &str,
        organization: &str,
    ) -> ProviderConfig {
        ProviderConfig::new(
            provider_id,
            api_key,
            organization,
            &self.inference_base_url,
        )
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(data_dir) = &self.settings().data_dir {
            return data_dir.clone();
        }
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_dir)
    }

    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        write_json_atomically(&self.config_path, &normalized_settings).context(PersistSnafu {
            stage: "persist-settings",
        })?;
        self.settings.store(Arc::new(normalized_settings));
        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    fn load_from_disk(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        match Self::figment(path).extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            }
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    Persist {
        stage: &'static str,
        source: PersistError,
    },
}

fn default_inference_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
