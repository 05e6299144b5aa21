use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::llm::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("no credential available for external section generation (provider {provider})")]
    MissingCredential { provider: String },

    #[error("unknown section {0:?}")]
    UnknownSection(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub database_url: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub fallback_provider: String,
    pub fallback_model: String,
    pub ollama_base_url: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub llm_max_attempts: u32,
    pub llm_backoff_base_ms: u64,
    pub llm_backoff_max_ms: u64,
    pub max_concurrent_properties: usize,
    pub shared_cache_max_age_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: parse_var("APP_PORT", "8080")?,
            environment: env::var("APP_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing {
                name: "DATABASE_URL",
            })?,
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "google".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            fallback_provider: env::var("FALLBACK_PROVIDER").unwrap_or_default(),
            fallback_model: env::var("FALLBACK_MODEL")
                .unwrap_or_else(|_| "gpt-4.1-mini".to_string()),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
            google_api_key: non_empty_var("GEMINI_API_KEY")
                .or_else(|| non_empty_var("GOOGLE_API_KEY")),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "valuation-report-service".to_string()),
            otel_exporter_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            default_temperature: parse_var("DEFAULT_TEMPERATURE", "0.0")?,
            default_max_tokens: parse_var("DEFAULT_MAX_TOKENS", "8192")?,
            llm_max_attempts: parse_var("LLM_MAX_ATTEMPTS", "3")?,
            llm_backoff_base_ms: parse_var("LLM_BACKOFF_BASE_MS", "1000")?,
            llm_backoff_max_ms: parse_var("LLM_BACKOFF_MAX_MS", "10000")?,
            max_concurrent_properties: parse_var("MAX_CONCURRENT_PROPERTIES", "4")?,
            shared_cache_max_age_days: parse_var("SHARED_CACHE_MAX_AGE_DAYS", "30")?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_max_attempts.max(1),
            base_delay: Duration::from_millis(self.llm_backoff_base_ms),
            max_delay: Duration::from_millis(self.llm_backoff_max_ms),
        }
    }

    /// Credential configured in the environment for the given provider.
    pub fn env_credential(&self, provider: &str) -> Option<&str> {
        match provider {
            "openai" => self.openai_api_key.as_deref(),
            "anthropic" => self.anthropic_api_key.as_deref(),
            "google" => self.google_api_key.as_deref(),
            _ => None,
        }
    }
}

/// Picks the credential for a run: explicit override, then the document's
/// `metadata.api_key`, then the environment.
pub fn resolve_credential(
    run_override: Option<&str>,
    document_key: Option<&str>,
    env_key: Option<&str>,
) -> Option<String> {
    [run_override, document_key, env_key]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}
