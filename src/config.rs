use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{VlmError, VlmResult};
use crate::llm::transport::REQUEST_TIMEOUT;

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "vlm-gateway";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub vlm: VlmConfig,
}

/// Which backend family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VlmProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl VlmProvider {
    pub const ALL: [VlmProvider; 3] = [VlmProvider::Ollama, VlmProvider::Anthropic, VlmProvider::OpenAi];

    /// Human-readable name for settings screens.
    pub fn label(self) -> &'static str {
        match self {
            VlmProvider::Ollama => "Ollama (local)",
            VlmProvider::Anthropic => "Anthropic (Claude)",
            VlmProvider::OpenAi => "OpenAI (ChatGPT)",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VlmProvider::Ollama => "ollama",
            VlmProvider::Anthropic => "anthropic",
            VlmProvider::OpenAi => "openai",
        }
    }

    /// Whether the backend refuses requests without an API key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, VlmProvider::Ollama)
    }
}

impl fmt::Display for VlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VlmProvider {
    type Err = VlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VlmProvider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VlmError::Config(format!("unsupported VLM provider '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlmConfig {
    #[serde(default)]
    pub provider: VlmProvider,
    pub base_url: String,
    /// Optional in the file; falls back to the `VLM_API_KEY` env var.
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Output-token ceiling. Unset means the backend/model-version default.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Chain requests through the responses API instead of chat completions.
    #[serde(default)]
    pub use_responses_api: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    REQUEST_TIMEOUT.as_millis() as u64
}

impl VlmConfig {
    pub fn new(provider: VlmProvider, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            use_responses_api: false,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_responses_api(mut self, enabled: bool) -> Self {
        self.use_responses_api = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The key, if present and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Field-level checks run before any adapter is built.
    pub fn validate(&self) -> VlmResult<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| VlmError::Config(format!("invalid base_url '{}': {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VlmError::Config(format!(
                "base_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(VlmError::Config("model must not be empty".into()));
        }
        if self.provider.requires_api_key() && self.api_key().is_none() {
            return Err(VlmError::Config(format!(
                "api_key is required for provider '{}'",
                self.provider
            )));
        }
        if !(1_000..=300_000).contains(&self.timeout_ms) {
            return Err(VlmError::Config(format!(
                "timeout_ms must be within 1000..=300000, got {}",
                self.timeout_ms
            )));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(VlmError::Config(format!("temperature out of range: {t}")));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(VlmError::Config(format!("top_p out of range: {p}")));
            }
        }
        Ok(())
    }

    /// Overlay `VLM_*` variables found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> VlmResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("VLM_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(base_url) = lookup("VLM_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(api_key) = lookup("VLM_API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(model) = lookup("VLM_MODEL_NAME") {
            self.model = model;
        }
        if let Some(flag) = lookup("VLM_USE_RESPONSES_API") {
            self.use_responses_api = matches!(flag.trim(), "1" | "true" | "TRUE" | "yes");
        }
        Ok(())
    }
}

fn resolve_config_path() -> VlmResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join(APP_DIR).join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(VlmError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

/// Load, apply `VLM_*` env overrides (including `.env`) and validate.
pub fn load_config() -> VlmResult<AppConfig> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();
    let path = resolve_config_path()?;
    load_config_from(&path, |key| std::env::var(key).ok())
}

pub fn load_config_from<F>(path: &Path, lookup: F) -> VlmResult<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let content = std::fs::read_to_string(path)?;
    let mut config: AppConfig = toml::from_str(&content)?;
    config.vlm.apply_overrides(lookup)?;
    config.vlm.validate()?;
    tracing::info!(
        path = %path.display(),
        provider = %config.vlm.provider,
        model = %config.vlm.model,
        responses_api = config.vlm.use_responses_api,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> VlmResult<()> {
    let path = resolve_config_path()?;
    save_config_to(&path, config)
}

pub fn save_config_to(path: &Path, config: &AppConfig) -> VlmResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[vlm]
provider = "openai"
base_url = "https://ark.example.com/api/v3"
api_key = "sk-test"
model = "ui-tars-1.5"
use_responses_api = true
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = load_config_from(&path, no_env).unwrap().vlm;
        assert_eq!(cfg.provider, VlmProvider::OpenAi);
        assert!(cfg.use_responses_api);
        assert_eq!(cfg.timeout(), REQUEST_TIMEOUT);
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_tokens, None);
    }

    #[test]
    fn env_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let env: HashMap<&str, &str> = [
            ("VLM_PROVIDER", "ollama"),
            ("VLM_BASE_URL", "http://localhost:11434"),
            ("VLM_MODEL_NAME", "llava"),
        ]
        .into_iter()
        .collect();
        let cfg = load_config_from(&path, |k| env.get(k).map(|v| v.to_string()))
            .unwrap()
            .vlm;
        assert_eq!(cfg.provider, VlmProvider::Ollama);
        assert_eq!(cfg.model, "llava");
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = AppConfig {
            vlm: VlmConfig::new(VlmProvider::Anthropic, "https://api.anthropic.com", "claude")
                .with_api_key("key"),
        };
        save_config_to(&path, &config).unwrap();
        let loaded = load_config_from(&path, no_env).unwrap();
        assert_eq!(loaded.vlm, config.vlm);
    }

    #[test]
    fn validation_rules() {
        let ok = VlmConfig::new(VlmProvider::OpenAi, "https://x.test/v1", "m").with_api_key("k");
        assert!(ok.validate().is_ok());

        let missing_key = VlmConfig::new(VlmProvider::Anthropic, "https://x.test", "m");
        assert!(matches!(missing_key.validate(), Err(VlmError::Config(_))));

        let local = VlmConfig::new(VlmProvider::Ollama, "http://localhost:11434", "phi3");
        assert!(local.validate().is_ok());

        let mut bad_url = ok.clone();
        bad_url.base_url = "not a url".into();
        assert!(bad_url.validate().is_err());

        let mut bad_timeout = ok.clone();
        bad_timeout.timeout_ms = 500;
        assert!(bad_timeout.validate().is_err());

        let mut bad_top_p = ok;
        bad_top_p.top_p = Some(1.5);
        assert!(bad_top_p.validate().is_err());
    }

    #[test]
    fn provider_names() {
        assert_eq!("Anthropic".parse::<VlmProvider>().unwrap(), VlmProvider::Anthropic);
        assert!("gemini".parse::<VlmProvider>().is_err());
        assert_eq!(VlmProvider::Ollama.label(), "Ollama (local)");
    }
}
