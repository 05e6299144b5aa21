use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::{GenerateRequest, GenerateResponse, Provider};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: AnthropicUsage,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| anyhow::anyhow!("invalid API key header: {e}"))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = AnthropicRequest {
            model: req.model.clone(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            system: req.system.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: req.prompt.clone(),
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<AnthropicError>(&error_body) {
                return Err(anyhow::anyhow!(
                    "Anthropic API error ({}): {}",
                    status,
                    err.error.message
                ));
            }
            return Err(anyhow::anyhow!(
                "Anthropic API error ({}): {}",
                status,
                error_body
            ));
        }

        let resp: AnthropicResponse = response.json().await?;

        if resp.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %resp.model, "Anthropic response truncated at max_tokens");
        }

        let content = resp
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(GenerateResponse {
            content,
            model: resp.model,
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cost_usd: 0.0,
            finish_reason: resp.stop_reason.unwrap_or_default(),
            provider: String::new(),
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_system() {
        let body = AnthropicRequest {
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 256,
            temperature: 0.0,
            system: String::new(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_text_blocks() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"{\"a\":"},{"type":"tool_use"},{"type":"text","text":"1}"}],
                "model":"claude-haiku-4-5-20251001","usage":{"input_tokens":3,"output_tokens":4},"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        let text: String = resp
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect();
        assert_eq!(text, "{\"a\":1}");
        assert_eq!(resp.usage.output_tokens, 4);
    }
}
