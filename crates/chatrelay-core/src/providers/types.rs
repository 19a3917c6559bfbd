//! Types describing backends and the requests sent to them

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};

/// Pricing tier of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Cheap,
    Paid,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Cheap => write!(f, "cheap"),
            Self::Paid => write!(f, "paid"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "cheap" => Ok(Self::Cheap),
            "paid" => Ok(Self::Paid),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

/// What a request is mostly about, used to match declared strengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// General conversation
    Chat,
    /// Writing or explaining code
    Code,
    /// Math, logic, multi-step analysis
    Reasoning,
    /// Describing or reading images
    Vision,
    /// Condensing long text
    Summarize,
    /// Translating between languages
    Translate,
    /// Stories, poems, brainstorming
    Creative,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Self::Chat,
        Self::Code,
        Self::Reasoning,
        Self::Vision,
        Self::Summarize,
        Self::Translate,
        Self::Creative,
    ];
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Code => write!(f, "code"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::Vision => write!(f, "vision"),
            Self::Summarize => write!(f, "summarize"),
            Self::Translate => write!(f, "translate"),
            Self::Creative => write!(f, "creative"),
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|intent| intent.to_string() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown intent: {}", s))
    }
}

/// Static capabilities declared by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_vision: bool,
    pub supports_long_context: bool,
}

/// Everything the ranker knows about one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Provider identifier (e.g., "groq")
    pub provider: String,
    /// Model identifier at that provider (e.g., "llama-3.3-70b-versatile")
    pub model: String,
    pub capabilities: Capabilities,
    pub tier: Tier,
    /// Prior reliability (0-10, higher is better)
    pub base_reliability: u8,
    /// Intents this backend is known to be good at
    pub strengths: BTreeSet<Intent>,
}

impl ProviderDescriptor {
    /// Create a descriptor with neutral defaults
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            capabilities: Capabilities::default(),
            tier: Tier::Paid,
            base_reliability: 5,
            strengths: BTreeSet::new(),
        }
    }

    /// Health key for this pair (`provider:model`)
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }

    /// Whether an id given by a caller refers to this backend.
    ///
    /// Accepts either the full `provider:model` key or the bare provider.
    pub fn matches(&self, id: &str) -> bool {
        id == self.provider || id == self.key()
    }

    pub fn with_vision(mut self, supported: bool) -> Self {
        self.capabilities.supports_vision = supported;
        self
    }

    pub fn with_long_context(mut self, supported: bool) -> Self {
        self.capabilities.supports_long_context = supported;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_reliability(mut self, reliability: u8) -> Self {
        self.base_reliability = reliability.min(10);
        self
    }

    pub fn with_strengths(mut self, strengths: impl IntoIterator<Item = Intent>) -> Self {
        self.strengths = strengths.into_iter().collect();
        self
    }
}

/// An image attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageRef {
    /// Publicly reachable URL
    Url { url: String },
    /// Base64 payload with its mime type
    Inline { mime_type: String, data: String },
}

impl ImageRef {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    /// Encode raw image bytes
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::Inline {
            mime_type: mime_type.into(),
            data: BASE64_STANDARD.encode(bytes),
        }
    }

    /// Render as a URL, using a `data:` URL for inline payloads
    pub fn as_url(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Inline { mime_type, data } => format!("data:{};base64,{}", mime_type, data),
        }
    }
}

/// A generation request as seen by adapters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_key_and_matches() {
        let descriptor = ProviderDescriptor::new("groq", "llama-3.3-70b");
        assert_eq!(descriptor.key(), "groq:llama-3.3-70b");
        assert!(descriptor.matches("groq"));
        assert!(descriptor.matches("groq:llama-3.3-70b"));
        assert!(!descriptor.matches("gemini"));
    }

    #[test]
    fn test_reliability_is_clamped() {
        let descriptor = ProviderDescriptor::new("a", "m").with_reliability(42);
        assert_eq!(descriptor.base_reliability, 10);
    }

    #[test]
    fn test_intent_parse() {
        assert_eq!("CODE".parse::<Intent>().unwrap(), Intent::Code);
        assert_eq!("vision".parse::<Intent>().unwrap(), Intent::Vision);
        assert!("poetry".parse::<Intent>().is_err());
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
        assert!("premium".parse::<Tier>().is_err());
    }

    #[test]
    fn test_image_data_url() {
        let image = ImageRef::from_bytes("image/png", b"abc");
        assert_eq!(image.as_url(), "data:image/png;base64,YWJj");
    }
}
