use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use crate::error::{GraphlateError, Result};

pub const LLM_API_KEY_ENV: &str = "GRAPHLATE_LLM_API_KEY";
pub const YOUDAO_APP_KEY_ENV: &str = "GRAPHLATE_YOUDAO_APP_KEY";
pub const YOUDAO_APP_SECRET_ENV: &str = "GRAPHLATE_YOUDAO_APP_SECRET";

// Default values for optional fields
fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_llm_temperature() -> f32 {
    0.1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub translate: TranslateConfig,
    #[serde(default)]
    pub interceptor: InterceptorConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Translation backend
    pub provider: Provider,
    /// Language every prompt should end up in (ISO 639-1)
    pub target_language: String,
    /// Reuse earlier translations within the session
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Share one backend call between concurrent misses for identical text
    #[serde(default)]
    pub single_flight: bool,
    /// Upper bound for a single backend call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub youdao: YoudaoConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Licensed translation API keyed by app key and secret
    Youdao,
    /// OpenAI-compatible chat completions endpoint
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoudaoConfig {
    pub endpoint: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, `/chat/completions` is appended
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorConfig {
    /// Feature flag read on every submission
    #[serde(default = "default_true")]
    pub auto_translate: bool,
    /// Additional text-encoding node types and their text fields
    /// e.g. `MyPromptNode = ["prompt", "negative"]`
    #[serde(default)]
    pub extra_text_fields: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Readiness checks before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between readiness checks
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Node-graph server accepting `POST /prompt`
    pub endpoint: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Llm,
            target_language: "en".to_string(),
            cache_enabled: true,
            single_flight: false,
            request_timeout_secs: default_request_timeout_secs(),
            youdao: YoudaoConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for YoudaoConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openapi.youdao.com/api".to_string(),
            app_key: String::new(),
            app_secret: String::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            temperature: default_llm_temperature(),
        }
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            auto_translate: true,
            extra_text_fields: HashMap::new(),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8188".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphlateError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| GraphlateError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GraphlateError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| GraphlateError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Fill empty credentials from the environment.
    pub fn apply_env(&mut self) {
        fill_from_env(&mut self.translate.llm.api_key, LLM_API_KEY_ENV);
        fill_from_env(&mut self.translate.youdao.app_key, YOUDAO_APP_KEY_ENV);
        fill_from_env(&mut self.translate.youdao.app_secret, YOUDAO_APP_SECRET_ENV);
    }

    /// Check that the selected provider has what it needs to make calls.
    pub fn validate(&self) -> Result<()> {
        if self.translate.target_language.trim().is_empty() {
            return Err(GraphlateError::Config("translate.target_language is empty".to_string()));
        }
        match self.translate.provider {
            Provider::Youdao => {
                let youdao = &self.translate.youdao;
                if youdao.app_key.is_empty() || youdao.app_secret.is_empty() {
                    return Err(GraphlateError::Config(format!(
                        "youdao provider needs app_key and app_secret (or {} / {})",
                        YOUDAO_APP_KEY_ENV, YOUDAO_APP_SECRET_ENV
                    )));
                }
            }
            Provider::Llm => {
                if self.translate.llm.api_key.is_empty() {
                    return Err(GraphlateError::Config(format!(
                        "llm provider needs api_key (or {})",
                        LLM_API_KEY_ENV
                    )));
                }
            }
        }
        Ok(())
    }
}

fn fill_from_env(slot: &mut String, var: &str) {
    if slot.is_empty() {
        if let Ok(value) = std::env::var(var) {
            *slot = value;
        }
    }
}
