//! Turning `provider:model` tokens into enabled adapters
//!
//! Each token names a backend kind and a model. The catalog fills in the
//! descriptor defaults that kind is known for; configuration may override any
//! of them before adapters are built.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use tracing::{info, warn};

use super::types::{Intent, ProviderDescriptor, Tier};
use super::{AdapterKind, ProviderAdapter, build_adapter};
use crate::error::{Error, Result};

/// A configured backend before credentials are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub kind: AdapterKind,
    pub descriptor: ProviderDescriptor,
    /// Overrides the kind's default endpoint
    pub base_url: Option<String>,
}

impl ProviderSpec {
    /// Parse a token and attach the catalog defaults
    pub fn from_token(token: &str) -> Result<Self> {
        let (kind, model) = parse_provider_token(token)?;
        Ok(Self {
            kind,
            descriptor: default_descriptor(kind, &model),
            base_url: None,
        })
    }
}

/// Split `provider:model` into its kind and model.
///
/// Only the first `:` separates; model ids such as `meta-llama/llama-3:free`
/// keep theirs.
pub fn parse_provider_token(token: &str) -> Result<(AdapterKind, String)> {
    let token = token.trim();
    let (provider, model) = token.split_once(':').ok_or_else(|| {
        Error::Configuration(format!(
            "Invalid provider token '{}': expected provider:model",
            token
        ))
    })?;

    let kind = provider.parse::<AdapterKind>().map_err(Error::Configuration)?;
    let model = model.trim();
    if model.is_empty() {
        return Err(Error::Configuration(format!(
            "Invalid provider token '{}': model is empty",
            token
        )));
    }

    Ok((kind, model.to_string()))
}

/// Descriptor defaults for a backend kind
pub fn default_descriptor(kind: AdapterKind, model: &str) -> ProviderDescriptor {
    let descriptor = ProviderDescriptor::new(kind.name(), model);
    let vision = model_suggests_vision(model);

    match kind {
        AdapterKind::Groq => descriptor
            .with_tier(Tier::Free)
            .with_reliability(7)
            .with_vision(vision)
            .with_strengths([Intent::Chat, Intent::Code]),
        AdapterKind::Gemini => descriptor
            .with_tier(Tier::Free)
            .with_reliability(8)
            .with_vision(true)
            .with_long_context(true)
            .with_strengths([
                Intent::Vision,
                Intent::Summarize,
                Intent::Translate,
                Intent::Reasoning,
            ]),
        AdapterKind::OpenRouter => {
            let tier = if model.ends_with(":free") {
                Tier::Free
            } else {
                Tier::Cheap
            };
            descriptor
                .with_tier(tier)
                .with_reliability(6)
                .with_vision(vision)
                .with_long_context(true)
                .with_strengths([Intent::Chat, Intent::Creative])
        }
        AdapterKind::OpenAi => descriptor
            .with_tier(Tier::Paid)
            .with_reliability(9)
            .with_vision(vision)
            .with_long_context(true)
            .with_strengths([Intent::Code, Intent::Reasoning, Intent::Chat]),
        AdapterKind::Mistral => descriptor
            .with_tier(Tier::Cheap)
            .with_reliability(7)
            .with_vision(vision)
            .with_strengths([Intent::Translate, Intent::Chat]),
        AdapterKind::DeepSeek => descriptor
            .with_tier(Tier::Cheap)
            .with_reliability(7)
            .with_long_context(true)
            .with_strengths([Intent::Code, Intent::Reasoning]),
        AdapterKind::Cloudflare => descriptor
            .with_tier(Tier::Free)
            .with_reliability(5)
            .with_strengths([Intent::Chat]),
    }
}

fn model_suggests_vision(model: &str) -> bool {
    let lower = model.to_lowercase();
    [
        "vision", "gpt-4o", "gpt-4.1", "llava", "pixtral", "llama-4", "gemini", "-vl",
    ]
    .iter()
    .any(|hint| lower.contains(hint))
}

/// Supplies secrets for adapters
pub trait CredentialResolver: Send + Sync {
    fn api_key(&self, kind: AdapterKind) -> Option<String>;

    /// Account identifier, for backends that scope endpoints by account
    fn account_id(&self, _kind: AdapterKind) -> Option<String> {
        None
    }
}

/// Reads secrets from environment variables.
///
/// `CHATRELAY_<PROVIDER>_API_KEY` wins over the provider's conventional
/// variable (e.g. `GROQ_API_KEY`).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn var(name: &str) -> Option<String> {
        env::var(name).ok().filter(|value| !value.trim().is_empty())
    }
}

impl CredentialResolver for EnvCredentials {
    fn api_key(&self, kind: AdapterKind) -> Option<String> {
        let scoped = format!("CHATRELAY_{}_API_KEY", kind.name().to_uppercase());
        Self::var(&scoped).or_else(|| Self::var(kind.api_key_env()))
    }

    fn account_id(&self, kind: AdapterKind) -> Option<String> {
        match kind {
            AdapterKind::Cloudflare => Self::var("CHATRELAY_CLOUDFLARE_ACCOUNT_ID")
                .or_else(|| Self::var("CLOUDFLARE_ACCOUNT_ID")),
            _ => None,
        }
    }
}

/// Fixed in-memory secrets, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<AdapterKind, String>,
    accounts: HashMap<AdapterKind, String>,
}

impl StaticCredentials {
    pub fn with_key(mut self, kind: AdapterKind, key: impl Into<String>) -> Self {
        self.keys.insert(kind, key.into());
        self
    }

    pub fn with_account(mut self, kind: AdapterKind, account_id: impl Into<String>) -> Self {
        self.accounts.insert(kind, account_id.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn api_key(&self, kind: AdapterKind) -> Option<String> {
        self.keys.get(&kind).cloned()
    }

    fn account_id(&self, kind: AdapterKind) -> Option<String> {
        self.accounts.get(&kind).cloned()
    }
}

/// Build every backend that has credentials, preserving declaration order
pub fn build_adapters(
    specs: &[ProviderSpec],
    credentials: &dyn CredentialResolver,
) -> Result<Vec<Arc<dyn ProviderAdapter>>> {
    let mut adapters = Vec::with_capacity(specs.len());

    for spec in specs {
        match build_adapter(spec, credentials)? {
            Some(adapter) => adapters.push(adapter),
            None => warn!(
                provider = %spec.descriptor.key(),
                env = spec.kind.api_key_env(),
                "No API key found, provider disabled"
            ),
        }
    }

    info!(
        enabled = adapters.len(),
        configured = specs.len(),
        "Provider adapters built"
    );
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_token() {
        let (kind, model) = parse_provider_token("groq:llama-3.3-70b-versatile").unwrap();
        assert_eq!(kind, AdapterKind::Groq);
        assert_eq!(model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_parse_keeps_model_colons() {
        let (kind, model) =
            parse_provider_token("openrouter:meta-llama/llama-3.3-70b-instruct:free").unwrap();
        assert_eq!(kind, AdapterKind::OpenRouter);
        assert_eq!(model, "meta-llama/llama-3.3-70b-instruct:free");
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        assert!(parse_provider_token("groq").is_err());
        assert!(parse_provider_token("groq:").is_err());
        assert!(parse_provider_token("acme:model").is_err());
    }

    #[test]
    fn test_default_descriptors() {
        let gemini = default_descriptor(AdapterKind::Gemini, "gemini-2.0-flash");
        assert!(gemini.capabilities.supports_vision);
        assert_eq!(gemini.tier, Tier::Free);

        let free = default_descriptor(AdapterKind::OpenRouter, "x/y:free");
        assert_eq!(free.tier, Tier::Free);
        let cheap = default_descriptor(AdapterKind::OpenRouter, "x/y");
        assert_eq!(cheap.tier, Tier::Cheap);

        let groq = default_descriptor(AdapterKind::Groq, "llama-3.1-8b-instant");
        assert!(!groq.capabilities.supports_vision);
    }

    #[test]
    fn test_build_adapters_skips_missing_keys() {
        let specs = vec![
            ProviderSpec::from_token("groq:llama-3.1-8b-instant").unwrap(),
            ProviderSpec::from_token("gemini:gemini-2.0-flash").unwrap(),
        ];
        let credentials = StaticCredentials::default().with_key(AdapterKind::Gemini, "key");

        let adapters = build_adapters(&specs, &credentials).unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].descriptor().provider, "gemini");
    }
}
