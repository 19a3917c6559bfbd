//! Provider adapters
//!
//! Every backend sits behind [`ProviderAdapter`]: a static [`ProviderDescriptor`]
//! for the ranker and a single cancellable `call`. Adapters never rank or
//! retry; the router owns that.
//!
//! The set of wire protocols is closed: [`AdapterKind`] names each supported
//! backend and [`build_adapter`] matches it exhaustively, so a new backend is
//! one new variant plus its adapter.

mod catalog;
mod cloudflare;
mod gemini;
mod http;
mod openai;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ProviderError, Result};

pub use catalog::{
    CredentialResolver, EnvCredentials, ProviderSpec, StaticCredentials, build_adapters,
    default_descriptor, parse_provider_token,
};
pub use cloudflare::CloudflareAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiCompatibleAdapter;
pub use types::{Capabilities, CompletionRequest, ImageRef, Intent, ProviderDescriptor, Tier};

/// Uniform call surface over one backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Static capabilities used for ranking
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Produce a completion.
    ///
    /// Implementations must stop work and return a `Cancelled` error once
    /// `cancel` fires.
    async fn call(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<String, ProviderError>;
}

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    OpenRouter,
    Groq,
    OpenAi,
    Mistral,
    DeepSeek,
    Gemini,
    Cloudflare,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 7] = [
        Self::OpenRouter,
        Self::Groq,
        Self::OpenAi,
        Self::Mistral,
        Self::DeepSeek,
        Self::Gemini,
        Self::Cloudflare,
    ];

    /// Provider name as written in `provider:model` tokens
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Mistral => "mistral",
            Self::DeepSeek => "deepseek",
            Self::Gemini => "gemini",
            Self::Cloudflare => "cloudflare",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Cloudflare => "https://api.cloudflare.com/client/v4",
        }
    }

    /// Conventional environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Cloudflare => "CLOUDFLARE_API_TOKEN",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| format!("Unknown provider: {}", s))
    }
}

/// Build the adapter for one configured backend.
///
/// Returns `Ok(None)` when no API key is available, which leaves the backend
/// disabled rather than failing startup.
pub fn build_adapter(
    spec: &ProviderSpec,
    credentials: &dyn CredentialResolver,
) -> Result<Option<Arc<dyn ProviderAdapter>>> {
    let Some(api_key) = credentials.api_key(spec.kind) else {
        return Ok(None);
    };
    let base_url = spec
        .base_url
        .clone()
        .unwrap_or_else(|| spec.kind.default_base_url().to_string());
    let descriptor = spec.descriptor.clone();

    let adapter: Arc<dyn ProviderAdapter> = match spec.kind {
        AdapterKind::OpenRouter
        | AdapterKind::Groq
        | AdapterKind::OpenAi
        | AdapterKind::Mistral
        | AdapterKind::DeepSeek => {
            Arc::new(OpenAiCompatibleAdapter::new(descriptor, base_url, api_key)?)
        }
        AdapterKind::Gemini => Arc::new(GeminiAdapter::new(descriptor, base_url, api_key)?),
        AdapterKind::Cloudflare => {
            let account_id = credentials.account_id(spec.kind).ok_or_else(|| {
                Error::Configuration(format!(
                    "{} requires an account id (set CLOUDFLARE_ACCOUNT_ID)",
                    spec.descriptor.key()
                ))
            })?;
            Arc::new(CloudflareAdapter::new(
                descriptor, base_url, api_key, account_id,
            )?)
        }
    };

    Ok(Some(adapter))
}
