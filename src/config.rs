use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{SeeTapError, SeeTapResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Provider families with fixed wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Zhipu,
    OpenAi,
    Claude,
    Gemini,
    Qwen,
    OpenAiCompatible,
}

impl ProviderKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Zhipu => "Zhipu AI",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Claude => "Anthropic Claude",
            ProviderKind::Gemini => "Google Gemini",
            ProviderKind::Qwen => "Qwen",
            ProviderKind::OpenAiCompatible => "OpenAI-compatible",
        }
    }

    /// Fixed endpoint per provider. Gemini keeps a `{model}` placeholder that
    /// is substituted at request-build time.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderKind::Zhipu => "https://open.bigmodel.cn/api/paas/v4/chat/completions",
            ProviderKind::OpenAi => "https://api.openai.com/v1/chat/completions",
            ProviderKind::Claude => "https://api.anthropic.com/v1/messages",
            ProviderKind::Gemini => {
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
            }
            ProviderKind::Qwen => {
                "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
            }
            ProviderKind::OpenAiCompatible => "",
        }
    }
}

/// One configured model endpoint. The resilient client reads a snapshot of
/// these per call; ownership stays with the host's configuration storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "generated_id")]
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Custom URL. Required for `OpenAiCompatible`, ignored otherwise.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

impl EndpointConfig {
    /// Resolved request URL for this endpoint.
    pub fn endpoint_url(&self) -> String {
        match self.provider {
            ProviderKind::OpenAiCompatible => self.endpoint.clone().unwrap_or_default(),
            ProviderKind::Gemini => self
                .provider
                .default_endpoint()
                .replace("{model}", &self.model),
            _ => self.provider.default_endpoint().to_string(),
        }
    }

    /// API key, overridable via `SEETAP_<ID>_API_KEY`.
    pub fn resolved_api_key(&self) -> String {
        std::env::var(format!("SEETAP_{}_API_KEY", self.id.to_uppercase()))
            .unwrap_or_else(|_| self.api_key.clone())
    }
}

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

/// Backoff parameters for per-endpoint retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Step-loop pacing and budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_inter_action_delay_ms")]
    pub inter_action_delay_ms: u64,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            step_delay_ms: default_step_delay_ms(),
            inter_action_delay_ms: default_inter_action_delay_ms(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

fn default_max_steps() -> u32 {
    50
}

fn default_step_delay_ms() -> u64 {
    500
}

fn default_inter_action_delay_ms() -> u64 {
    300
}

fn default_pause_poll_ms() -> u64 {
    200
}

fn resolve_config_path() -> SeeTapResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(SeeTapError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> SeeTapResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), endpoints = config.endpoints.len(), "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> SeeTapResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_substitutes_gemini_model() {
        let ep = EndpointConfig {
            id: "g1".into(),
            name: "gemini".into(),
            provider: ProviderKind::Gemini,
            model: "gemini-1.5-flash".into(),
            api_key: "k".into(),
            endpoint: None,
            enabled: true,
            priority: 0,
        };
        assert_eq!(
            ep.endpoint_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn openai_compatible_uses_custom_endpoint() {
        let ep = EndpointConfig {
            id: "c1".into(),
            name: "local".into(),
            provider: ProviderKind::OpenAiCompatible,
            model: "m".into(),
            api_key: "k".into(),
            endpoint: Some("http://localhost:8080/v1/chat/completions".into()),
            enabled: true,
            priority: 0,
        };
        assert_eq!(ep.endpoint_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn config_defaults_parse_from_minimal_toml() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [[endpoints]]
            name = "primary"
            provider = "zhipu"
            model = "glm-4v"
            api_key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.endpoints.len(), 1);
        assert!(cfg.endpoints[0].enabled);
        assert_eq!(cfg.endpoints[0].priority, 0);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.executor.max_steps, 50);
    }
}
