use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::{GenerateRequest, GenerateResponse, Provider};
use crate::telemetry::metrics::{
    GEN_AI_ERROR_COUNT, GEN_AI_FALLBACK_COUNT, GEN_AI_OPERATION_DURATION, GEN_AI_TOKEN_USAGE,
};

/// Secondary provider tried once when the primary call fails.
pub struct Fallback {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

pub struct LlmClient {
    pub primary: Arc<dyn Provider>,
    pub fallback: Option<Fallback>,
}

impl LlmClient {
    pub fn new(primary: Arc<dyn Provider>, fallback: Option<Fallback>) -> Self {
        Self { primary, fallback }
    }

    pub async fn generate_once(
        &self,
        provider: &dyn Provider,
        req: &GenerateRequest,
    ) -> anyhow::Result<GenerateResponse> {
        let provider_name = provider.name().to_string();
        let span_display_name = format!("gen_ai.chat {}", req.model);
        let start = Instant::now();

        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %span_display_name,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %provider_name,
            gen_ai.request.model = %req.model,
            server.address = %provider.server_address(),
            gen_ai.request.temperature = req.temperature,
            gen_ai.request.max_tokens = req.max_tokens as i64,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            diagnosis.stage = %req.stage,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );

        span.add_event(
            "gen_ai.user.message",
            vec![KeyValue::new("gen_ai.prompt", truncate(&req.prompt, 1000))],
        );

        let result = provider.generate(req).instrument(span.clone()).await;
        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(resp) => {
                span.record("gen_ai.response.model", resp.model.as_str());
                span.record("gen_ai.usage.input_tokens", resp.input_tokens as i64);
                span.record("gen_ai.usage.output_tokens", resp.output_tokens as i64);
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

                let provider_kv = KeyValue::new("gen_ai.provider.name", provider_name);
                let model_kv = KeyValue::new("gen_ai.request.model", resp.model.clone());

                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.input_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "input"),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.output_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "output"),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_OPERATION_DURATION.record(duration, &[provider_kv, model_kv]);

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

    /// One call to the primary provider; on failure, one call to the
    /// fallback if configured. No retries.
    pub async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let primary_err = match self.generate_once(self.primary.as_ref(), req).await {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };

        let Some(fallback) = &self.fallback else {
            return Err(anyhow::anyhow!(
                "{} provider failed: {}",
                self.primary.name(),
                primary_err
            ));
        };

        tracing::warn!(
            primary_provider = %self.primary.name(),
            fallback_provider = %fallback.provider.name(),
            error = %primary_err,
            "Primary provider failed, falling back"
        );

        GEN_AI_FALLBACK_COUNT.add(1, &[]);

        let fallback_req = GenerateRequest {
            model: fallback.model.clone(),
            ..req.clone()
        };

        self.generate_once(fallback.provider.as_ref(), &fallback_req)
            .await
            .map_err(|fallback_err| {
                anyhow::anyhow!(
                    "{} provider failed: {}; fallback {} failed: {}",
                    self.primary.name(),
                    primary_err,
                    fallback.provider.name(),
                    fallback_err
                )
            })
    }
}

fn classify_error(err: &anyhow::Error) -> &'static str {
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

fn truncate(s: &str, max: usize) -> String {
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
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted provider: pops replies in order, records prompts.
    pub(crate) struct ScriptedProvider {
        pub name: &'static str,
        pub replies: Mutex<Vec<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
        pub systems: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(name: &'static str, replies: Vec<Result<String, String>>) -> Self {
            Self {
                name,
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
                systems: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            self.prompts.lock().unwrap().push(req.prompt.clone());
            self.systems.lock().unwrap().push(req.system.clone());
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Err("no scripted reply".to_string())
                } else {
                    replies.remove(0)
                }
            };
            match reply {
                Ok(content) => Ok(GenerateResponse {
                    content,
                    model: req.model.clone(),
                    input_tokens: 10,
                    output_tokens: 20,
                    finish_reason: "stop".to_string(),
                    provider: self.name.to_string(),
                }),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            }
        }

        fn name(&self) -> &str {
            self.name
        }

        fn server_address(&self) -> &str {
            "localhost"
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "primary-model".to_string(),
            system: String::new(),
            prompt: "prompt".to_string(),
            temperature: 0.3,
            max_tokens: 64,
            stage: "report".to_string(),
        }
    }

    #[tokio::test]
    async fn test_generate_primary_success() {
        let primary = Arc::new(ScriptedProvider::new("groq", vec![Ok("hello".to_string())]));
        let client = LlmClient::new(primary.clone(), None);

        let resp = client.generate(&request()).await.unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.provider, "groq");
        assert_eq!(primary.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generate_does_not_retry_without_fallback() {
        let primary = Arc::new(ScriptedProvider::new(
            "groq",
            vec![Err("503 service unavailable".to_string()), Ok("late".to_string())],
        ));
        let client = LlmClient::new(primary.clone(), None);

        let err = client.generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("groq provider failed"));
        assert_eq!(primary.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generate_uses_fallback_model() {
        let primary = Arc::new(ScriptedProvider::new(
            "groq",
            vec![Err("429 rate limit".to_string())],
        ));
        let secondary = Arc::new(ScriptedProvider::new("openai", vec![Ok("{}".to_string())]));
        let client = LlmClient::new(
            primary,
            Some(Fallback {
                provider: secondary.clone(),
                model: "fallback-model".to_string(),
            }),
        );

        let resp = client.generate(&request()).await.unwrap();
        assert_eq!(resp.provider, "openai");
        assert_eq!(resp.model, "fallback-model");
    }

    #[tokio::test]
    async fn test_generate_reports_both_failures() {
        let primary = Arc::new(ScriptedProvider::new("groq", vec![Err("boom".to_string())]));
        let secondary = Arc::new(ScriptedProvider::new("ollama", vec![Err("down".to_string())]));
        let client = LlmClient::new(
            primary,
            Some(Fallback {
                provider: secondary,
                model: "llama3".to_string(),
            }),
        );

        let err = client.generate(&request()).await.unwrap_err().to_string();
        assert!(err.contains("boom"));
        assert!(err.contains("down"));
    }

    #[test]
    fn test_classify_error_categories() {
        let cases = vec![
            ("rate limit exceeded", "rate_limit"),
            ("status 429: too many requests", "rate_limit"),
            ("request timed out", "timeout"),
            ("401 unauthorized", "auth_error"),
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
    fn test_truncate_multibyte_safe() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
        let result = truncate("नीम तेल", 4);
        assert!(result.len() <= 4);
        assert!(result.is_char_boundary(result.len()));
    }
}
