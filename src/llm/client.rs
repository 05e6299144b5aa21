use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::pricing::{PROVIDER_PORTS, PROVIDER_SERVERS, calculate_cost};
use super::{GenerateRequest, GenerateResponse, Provider};
use crate::telemetry::metrics::{
    GEN_AI_COST, GEN_AI_ERROR_COUNT, GEN_AI_FALLBACK_COUNT, GEN_AI_OPERATION_DURATION,
    GEN_AI_TOKEN_USAGE,
};

/// Primary provider with an optional fallback. Each call is a single
/// attempt per provider; retries are owned by the caller's `RetryPolicy`.
pub struct LlmClient {
    pub primary: Arc<dyn Provider>,
    pub fallback: Option<Arc<dyn Provider>>,
    pub model: String,
    pub fallback_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmClient {
    pub fn new(primary: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            primary,
            fallback: None,
            model: model.into(),
            fallback_model: String::new(),
            temperature: 0.0,
            max_tokens: 8192,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.fallback = Some(fallback);
        self.fallback_model = model.into();
        self
    }

    /// Request for one section call using the client's model settings.
    pub fn request(&self, section: &str, system: String, prompt: String) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            system,
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            section: section.to_string(),
        }
    }

    pub async fn generate_once(
        &self,
        provider: &dyn Provider,
        req: &GenerateRequest,
    ) -> anyhow::Result<GenerateResponse> {
        let provider_name = provider.name().to_string();
        let span_display_name = format!("gen_ai.chat {}", req.model);
        let start = Instant::now();

        let server_addr = PROVIDER_SERVERS
            .get(provider_name.as_str())
            .copied()
            .unwrap_or("unknown");
        let server_port = PROVIDER_PORTS
            .get(provider_name.as_str())
            .copied()
            .unwrap_or(443);

        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %span_display_name,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %provider_name,
            gen_ai.request.model = %req.model,
            server.address = %server_addr,
            server.port = server_port,
            gen_ai.request.temperature = req.temperature,
            gen_ai.request.max_tokens = req.max_tokens as i64,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.usage.cost_usd = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            report.section = %req.section,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );

        {
            let mut user_event_attrs =
                vec![KeyValue::new("gen_ai.prompt", truncate(&req.prompt, 1000))];
            if !req.system.is_empty() {
                user_event_attrs.push(KeyValue::new(
                    "gen_ai.system_instructions",
                    truncate(&req.system, 500),
                ));
            }
            span.add_event("gen_ai.user.message", user_event_attrs);
        }

        let result = provider.generate(req).instrument(span.clone()).await;

        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(mut resp) => {
                resp.provider = provider_name.clone();
                resp.cost_usd = calculate_cost(&resp.model, resp.input_tokens, resp.output_tokens);

                span.record("gen_ai.response.model", resp.model.as_str());
                span.record("gen_ai.usage.input_tokens", resp.input_tokens as i64);
                span.record("gen_ai.usage.output_tokens", resp.output_tokens as i64);
                span.record("gen_ai.usage.cost_usd", resp.cost_usd);
                if !resp.finish_reason.is_empty() {
                    span.record(
                        "gen_ai.response.finish_reasons",
                        resp.finish_reason.as_str(),
                    );
                }

                span.add_event(
                    "gen_ai.assistant.message",
                    vec![KeyValue::new(
                        "gen_ai.completion",
                        truncate(&resp.content, 2000),
                    )],
                );

                let op_kv = KeyValue::new("gen_ai.operation.name", "chat");
                let provider_kv = KeyValue::new("gen_ai.provider.name", provider_name);
                let model_kv = KeyValue::new("gen_ai.request.model", resp.model.clone());

                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.input_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "input"),
                        op_kv.clone(),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.output_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "output"),
                        op_kv.clone(),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_OPERATION_DURATION.record(
                    duration,
                    &[op_kv.clone(), provider_kv.clone(), model_kv.clone()],
                );
                GEN_AI_COST.add(resp.cost_usd, &[op_kv, provider_kv, model_kv]);

                Ok(resp)
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.type", classify_error(&err));

                GEN_AI_ERROR_COUNT.add(
                    1,
                    &[
                        KeyValue::new("gen_ai.provider.name", provider_name),
                        KeyValue::new("gen_ai.request.model", req.model.clone()),
                    ],
                );

                Err(err)
            }
        }
    }

    /// One attempt against the primary provider, then one against the
    /// fallback (with the fallback model) if configured.
    pub async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let primary_err = match self.generate_once(self.primary.as_ref(), req).await {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };

        let Some(fallback) = self.fallback.as_ref() else {
            return Err(primary_err);
        };

        tracing::warn!(
            primary_provider = %self.primary.name(),
            fallback_provider = %fallback.name(),
            error = %primary_err,
            "Primary provider failed, falling back"
        );

        GEN_AI_FALLBACK_COUNT.add(1, &[]);

        let fallback_req = GenerateRequest {
            model: self.fallback_model.clone(),
            ..req.clone()
        };

        self.generate_once(fallback.as_ref(), &fallback_req)
            .await
            .map_err(|fallback_err| {
                anyhow::anyhow!(
                    "primary provider {} failed: {primary_err}; fallback {} failed: {fallback_err}",
                    self.primary.name(),
                    fallback.name()
                )
            })
    }
}

pub(crate) fn classify_error(err: &anyhow::Error) -> &'static str {
    let msg = err.to_string().to_lowercase();
    if msg.contains("rate limit") || msg.contains("429") {
        "rate_limit"
    } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline") {
        "timeout"
    } else if msg.contains("401")
        || msg.contains("403")
        || msg.contains("auth")
        || msg.contains("api key")
    {
        "auth_error"
    } else if msg.contains("400") || msg.contains("422") || msg.contains("invalid") {
        "invalid_request"
    } else if msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("server")
    {
        "server_error"
    } else if msg.contains("connect")
        || msg.contains("dns")
        || msg.contains("network")
        || msg.contains("reset")
    {
        "network_error"
    } else {
        "unknown_error"
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.char_indices()
            .take_while(|&(i, c)| i + c.len_utf8() <= max)
            .map(|(_, c)| c)
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;

    #[test]
    fn test_classify_error_categories() {
        let cases = vec![
            ("rate limit exceeded", "rate_limit"),
            ("status 429: too many requests", "rate_limit"),
            ("context deadline exceeded: timeout", "timeout"),
            ("request timed out", "timeout"),
            ("401 unauthorized", "auth_error"),
            ("403 forbidden", "auth_error"),
            ("invalid api key", "auth_error"),
            ("422 unprocessable entity", "invalid_request"),
            ("503 service unavailable", "server_error"),
            ("connection refused", "network_error"),
            ("something unexpected", "unknown_error"),
        ];

        for (msg, expected) in cases {
            let err = anyhow::anyhow!("{}", msg);
            assert_eq!(
                classify_error(&err),
                expected,
                "classify_error({msg:?}) should be {expected:?}"
            );
        }
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let result = truncate("hé世界!", 3);
        assert!(result.len() <= 3);
        assert!(result.is_char_boundary(result.len()));
    }

    #[tokio::test]
    async fn test_generate_uses_fallback_after_primary_failure() {
        let primary = Arc::new(ScriptedProvider::new(
            "google",
            vec![Err("503 service unavailable".to_string())],
        ));
        let fallback = Arc::new(ScriptedProvider::always("openai", "{}"));
        let client = LlmClient::new(primary.clone(), "gemini-2.0-flash")
            .with_fallback(fallback.clone(), "gpt-4.1-mini");

        let req = client.request("property_overview", String::new(), "prompt".to_string());
        let resp = client.generate(&req).await.unwrap();

        assert_eq!(resp.provider, "openai");
        assert_eq!(resp.model, "gpt-4.1-mini");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_generate_without_fallback_returns_primary_error() {
        let primary = Arc::new(ScriptedProvider::new(
            "google",
            vec![Err("connection refused".to_string())],
        ));
        let client = LlmClient::new(primary.clone(), "gemini-2.0-flash");

        let req = client.request("safety", String::new(), "prompt".to_string());
        let err = client.generate(&req).await.unwrap_err();

        assert!(err.to_string().contains("connection refused"));
        assert_eq!(primary.calls(), 1);
    }
}
