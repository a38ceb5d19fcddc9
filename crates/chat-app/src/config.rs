use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use hearth_llm::{
    BackendError, BackendKind, BackendSettings, DEFAULT_GEMINI_MODEL, DEFAULT_OLLAMA_BASE_URL,
    DEFAULT_OLLAMA_MODEL, GEMINI_BACKEND_ID, GeminiConfig, OllamaConfig,
};

/// Prefix for environment overrides, e.g. `HEARTH_BACKEND=ollama` or
/// `HEARTH_GEMINI__API_KEY=...`.
pub const CONFIG_ENV_PREFIX: &str = "HEARTH_";
pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = "hearth.toml";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to load configuration: {source}"))]
    ExtractConfig {
        stage: &'static str,
        source: figment::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiSection {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaSection {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Selected backend variant, `gemini` or `ollama`.
    pub backend: String,
    pub database_path: PathBuf,
    /// Directory scanned for tabular exports pinned as chat context.
    pub data_dir: PathBuf,
    /// Consumer re-poll cadence while a stream is in flight.
    pub poll_interval_ms: u64,
    pub gemini: GeminiSection,
    pub ollama: OllamaSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: GEMINI_BACKEND_ID.to_string(),
            database_path: PathBuf::from(".hearth/chats.db"),
            data_dir: PathBuf::from("data"),
            poll_interval_ms: 10,
            gemini: GeminiSection {
                api_key: String::new(),
                model: DEFAULT_GEMINI_MODEL.to_string(),
            },
            ollama: OllamaSection {
                base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
                model: DEFAULT_OLLAMA_MODEL.to_string(),
            },
        }
    }
}

impl AppConfig {
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_RELATIVE_PATH))
    }

    /// Defaults, overlaid by the TOML file (if present), overlaid by
    /// `HEARTH_`-prefixed environment variables.
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(CONFIG_ENV_PREFIX).split("__"))
            .extract()
            .context(ExtractConfigSnafu {
                stage: "config-extract",
            })
    }

    pub fn backend_kind(&self) -> Result<BackendKind, BackendError> {
        self.backend.parse()
    }

    pub fn backend_settings(&self) -> BackendSettings {
        let mut api_key = self.gemini.api_key.clone();
        if api_key.trim().is_empty() {
            // Deployments traditionally provide the key via .env as
            // GOOGLE_API_KEY; honor that spelling too.
            api_key = std::env::var("GOOGLE_API_KEY").unwrap_or_default();
        }

        BackendSettings {
            gemini: GeminiConfig::new(api_key, &self.gemini.model),
            ollama: OllamaConfig::new(&self.ollama.base_url, &self.ollama.model),
        }
    }
}
