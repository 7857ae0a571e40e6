pub mod client;
pub mod openai;

pub use client::LlmClient;

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stage: String,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse>;
    fn name(&self) -> &str;
    /// Host reported on spans as `server.address`.
    fn server_address(&self) -> &str;
}

/// Builds a provider by name. `none` (or anything unknown for the fallback
/// slot) yields `None`.
pub fn provider_from_name(
    name: &str,
    config: &crate::config::Config,
) -> Option<Arc<dyn Provider>> {
    match name {
        "groq" => Some(Arc::new(openai::OpenAICompatibleProvider::groq(
            config.groq_api_key.as_deref().unwrap_or(""),
        ))),
        "openai" => Some(Arc::new(openai::OpenAICompatibleProvider::openai(
            config.openai_api_key.as_deref().unwrap_or(""),
        ))),
        "ollama" => Some(Arc::new(openai::OpenAICompatibleProvider::ollama(
            &config.ollama_base_url,
        ))),
        _ => None,
    }
}
