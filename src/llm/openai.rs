use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    },
};

use super::{GenerateRequest, GenerateResponse, Provider};

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Any chat-completions endpoint speaking the OpenAI wire format.
pub struct OpenAICompatibleProvider {
    client: Client<OpenAIConfig>,
    provider_name: &'static str,
    server_address: String,
}

impl OpenAICompatibleProvider {
    pub fn groq(api_key: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(GROQ_API_BASE);
        Self {
            client: Client::with_config(config),
            provider_name: "groq",
            server_address: "api.groq.com".to_string(),
        }
    }

    pub fn openai(api_key: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            provider_name: "openai",
            server_address: "api.openai.com".to_string(),
        }
    }

    pub fn ollama(base_url: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key("ollama")
            .with_api_base(format!("{base_url}/v1"));
        Self {
            client: Client::with_config(config),
            provider_name: "ollama",
            server_address: host_of(base_url),
        }
    }
}

fn host_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    without_scheme
        .split(['/', ':'])
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

#[async_trait::async_trait]
impl Provider for OpenAICompatibleProvider {
    async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let mut messages = Vec::with_capacity(2);
        if !req.system.is_empty() {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(req.system.clone()),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(req.prompt.clone()),
                name: None,
            },
        ));

        #[allow(deprecated)]
        let request = CreateChatCompletionRequest {
            model: req.model.clone(),
            messages,
            temperature: Some(req.temperature),
            max_completion_tokens: Some(req.max_tokens),
            ..Default::default()
        };

        let response = self.client.chat().create(request).await?;

        let choice = response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let finish_reason = choice
            .and_then(|c| c.finish_reason)
            .map(|r| format!("{r:?}").to_lowercase())
            .unwrap_or_default();

        let (input_tokens, output_tokens) = response
            .usage
            .as_ref()
            .map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));

        Ok(GenerateResponse {
            content,
            model: response.model,
            input_tokens,
            output_tokens,
            finish_reason,
            provider: self.provider_name.to_string(),
        })
    }

    fn name(&self) -> &str {
        self.provider_name
    }

    fn server_address(&self) -> &str {
        &self.server_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of_strips_scheme_port_and_path() {
        assert_eq!(host_of("http://localhost:11434"), "localhost");
        assert_eq!(host_of("https://ollama.internal/base"), "ollama.internal");
        assert_eq!(host_of("gpu-box:11434"), "gpu-box");
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(OpenAICompatibleProvider::groq("key").name(), "groq");
        assert_eq!(OpenAICompatibleProvider::openai("key").name(), "openai");
        let ollama = OpenAICompatibleProvider::ollama("http://localhost:11434");
        assert_eq!(ollama.name(), "ollama");
        assert_eq!(ollama.server_address(), "localhost");
    }
}
