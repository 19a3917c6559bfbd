//! Cloudflare Workers AI adapter

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::http::{http_client, non_empty, send_json};
use super::types::{CompletionRequest, ProviderDescriptor};
use super::ProviderAdapter;
use crate::error::{ProviderError, Result};

#[derive(Debug, Serialize)]
struct RunRequest {
    messages: Vec<RunMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RunMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    result: Option<RunResult>,
    #[serde(default)]
    errors: Vec<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunResult {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    message: String,
}

/// Adapter for `/accounts/{account}/ai/run/{model}`.
///
/// Text only; image requests are rejected without a network call.
#[derive(Clone)]
pub struct CloudflareAdapter {
    descriptor: ProviderDescriptor,
    http_client: HttpClient,
    base_url: String,
    api_key: String,
    account_id: String,
}

impl std::fmt::Debug for CloudflareAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareAdapter")
            .field("model", &self.descriptor.model)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl CloudflareAdapter {
    pub fn new(
        descriptor: ProviderDescriptor,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            descriptor,
            http_client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            account_id: account_id.into(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for CloudflareAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<String, ProviderError> {
        if request.has_images() {
            return Err(ProviderError::hard(format!(
                "{} does not accept images",
                self.descriptor.key()
            )));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(RunMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(RunMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let url = format!(
            "{}/accounts/{}/ai/run/{}",
            self.base_url, self.account_id, self.descriptor.model
        );
        debug!(model = %self.descriptor.model, "Sending Workers AI request");

        let builder = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&RunRequest {
                messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            });

        let response: RunResponse = send_json(builder, &cancel).await?;
        if let Some(error) = response.errors.first() {
            return Err(ProviderError::transient(error.message.clone()));
        }

        non_empty(
            response.result.and_then(|result| result.response),
            &self.descriptor.key(),
        )
    }
}
