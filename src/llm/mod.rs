pub mod anthropic;
pub mod client;
pub mod openai;
pub mod pricing;
pub mod retry;

use std::sync::Arc;

pub use client::LlmClient;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub section: String,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub finish_reason: String,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse>;
    fn name(&self) -> &str;
}

/// Builds a provider by name. Providers other than ollama need a credential.
pub fn build_provider(
    name: &str,
    credential: Option<&str>,
    ollama_base_url: &str,
) -> Option<Arc<dyn Provider>> {
    match name {
        "ollama" => Some(Arc::new(openai::OpenAIProvider::new_ollama(ollama_base_url))),
        "anthropic" => credential
            .map(|key| Arc::new(anthropic::AnthropicProvider::new(key)) as Arc<dyn Provider>),
        "openai" => {
            credential.map(|key| Arc::new(openai::OpenAIProvider::new(key)) as Arc<dyn Provider>)
        }
        "google" | "gemini" => credential
            .map(|key| Arc::new(openai::OpenAIProvider::new_google(key)) as Arc<dyn Provider>),
        _ => None,
    }
}

pub fn requires_credential(provider: &str) -> bool {
    provider != "ollama"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_provider_requires_key() {
        assert!(build_provider("google", None, "http://localhost:11434").is_none());
        assert!(build_provider("openai", None, "http://localhost:11434").is_none());
        assert!(build_provider("unknown", Some("k"), "http://localhost:11434").is_none());
    }

    #[test]
    fn test_build_provider_names() {
        let google = build_provider("google", Some("k"), "http://localhost:11434").unwrap();
        assert_eq!(google.name(), "google");
        let anthropic = build_provider("anthropic", Some("k"), "http://localhost:11434").unwrap();
        assert_eq!(anthropic.name(), "anthropic");
        let ollama = build_provider("ollama", None, "http://localhost:11434").unwrap();
        assert_eq!(ollama.name(), "ollama");
    }

    #[test]
    fn test_requires_credential() {
        assert!(requires_credential("google"));
        assert!(!requires_credential("ollama"));
    }
}
