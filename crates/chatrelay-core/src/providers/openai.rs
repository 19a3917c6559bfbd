//! OpenAI-compatible chat completions adapter
//!
//! Covers every backend speaking the `/chat/completions` dialect: OpenRouter,
//! Groq, OpenAI, Mistral and DeepSeek. Images travel as `image_url` content
//! parts.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::http::{http_client, non_empty, send_json};
use super::types::{CompletionRequest, ProviderDescriptor};
use super::ProviderAdapter;
use crate::error::{ProviderError, Result};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MessageRole {
    System,
    User,
    Assistant,
}

/// Request body for chat completions
#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: MessageRole,
    content: MessageContent,
}

/// Plain text, or text plus images for vision models
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[allow(dead_code)]
    role: Option<MessageRole>,
    content: Option<String>,
}

impl<'a> ChatRequest<'a> {
    fn from_completion(model: &'a str, request: &CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(2);

        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: MessageRole::System,
                content: MessageContent::Text(system.clone()),
            });
        }

        let content = if request.has_images() {
            let mut parts = vec![ContentPart::Text {
                text: request.prompt.clone(),
            }];
            parts.extend(request.images.iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.as_url(),
                },
            }));
            MessageContent::Parts(parts)
        } else {
            MessageContent::Text(request.prompt.clone())
        };

        messages.push(ChatMessage {
            role: MessageRole::User,
            content,
        });

        Self {
            model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

/// Adapter for `/chat/completions` backends
#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    descriptor: ProviderDescriptor,
    http_client: HttpClient,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiCompatibleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleAdapter")
            .field("provider", &self.descriptor.key())
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        descriptor: ProviderDescriptor,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            descriptor,
            http_client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest::from_completion(&self.descriptor.model, request);

        debug!(
            provider = %self.descriptor.key(),
            images = request.images.len(),
            "Sending chat completion request"
        );

        let mut builder = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);

        if self.descriptor.provider == "openrouter" {
            builder = builder
                .header("HTTP-Referer", "https://github.com/chatrelay/chatrelay")
                .header("X-Title", "chatrelay");
        }

        let response: ChatResponse = send_json(builder, &cancel).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content);

        non_empty(text, &self.descriptor.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use crate::providers::ImageRef;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::new(
            ProviderDescriptor::new("groq", "llama-3.1-8b-instant"),
            server.uri(),
            "test-key",
        )
        .unwrap()
    }

    #[test]
    fn test_request_body_with_images() {
        let request = CompletionRequest::new("what is this?")
            .with_system("be brief")
            .with_images(vec![ImageRef::url("https://example.com/cat.png")]);
        let body = serde_json::to_value(ChatRequest::from_completion("m", &request)).unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][0]["type"], "text");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "https://example.com/cat.png"
        );
        assert!(body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_call_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  hello  "}}]
            })))
            .mount(&server)
            .await;

        let text = adapter(&server)
            .call(&CompletionRequest::new("hi"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_call_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .call(&CompletionRequest::new("hi"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Transient);
        assert_eq!(err.status, Some(500));
    }

    #[tokio::test]
    async fn test_call_unauthorized_is_hard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .call(&CompletionRequest::new("hi"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Hard);
        assert_eq!(err.status, Some(401));
    }

    #[tokio::test]
    async fn test_call_empty_choices_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .call(&CompletionRequest::new("hi"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Empty);
    }

    #[tokio::test]
    async fn test_call_observes_cancellation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = adapter(&server)
            .call(&CompletionRequest::new("hi"), cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Cancelled);
    }
}
