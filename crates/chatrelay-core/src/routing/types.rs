//! Core types for request routing

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::providers::{CompletionRequest, ImageRef, Intent};

/// Per-request knobs for [`Router::ask`](super::Router::ask)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    /// Per-attempt timeout; falls back to the router default
    pub timeout_ms: Option<u64>,
    /// Provider ids (`provider:model` or bare provider) to try first
    #[serde(default)]
    pub prefer: Vec<String>,
}

impl AskOptions {
    pub fn new() -> Self {
        Self::default()
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

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn prefer(mut self, id: impl Into<String>) -> Self {
        self.prefer.push(id.into());
        self
    }

    /// The adapter-facing request for a prompt
    pub(crate) fn to_completion(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_string(),
            system: self.system.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            images: self.images.clone(),
        }
    }
}

/// What a request needs from a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequirements {
    pub needs_vision: bool,
    pub max_output_tokens: Option<u32>,
    pub intent: Intent,
    pub prefer: Vec<String>,
}

impl RouteRequirements {
    pub fn new(intent: Intent) -> Self {
        Self {
            needs_vision: false,
            max_output_tokens: None,
            intent,
            prefer: Vec::new(),
        }
    }

    pub fn with_vision(mut self, needs_vision: bool) -> Self {
        self.needs_vision = needs_vision;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_prefer(mut self, prefer: Vec<String>) -> Self {
        self.prefer = prefer;
        self
    }
}

/// Attempt pass over the candidate list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Cooling-down backends are skipped
    First,
    /// Cooldown is ignored
    Second,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "1"),
            Self::Second => write!(f, "2"),
        }
    }
}

/// One entry in a request's attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub provider_id: String,
    pub model_id: String,
    pub ok: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub phase: Phase,
    /// Passed over because of cooldown; no call was made
    #[serde(default)]
    pub skipped: bool,
}

impl AttemptTrace {
    /// `provider:model`
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider_id, self.model_id)
    }
}

impl fmt::Display for AttemptTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[phase {}] {}", self.phase, self.key())?;
        if self.skipped {
            return write!(f, ": skipped (cooling down)");
        }
        write!(f, " ({} ms): ", self.elapsed_ms)?;
        match &self.error {
            Some(error) => write!(f, "{}", error),
            None if self.ok => write!(f, "ok"),
            None => write!(f, "failed"),
        }
    }
}

/// Successful outcome of a routed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterResult {
    pub text: String,
    pub provider_id: String,
    pub model_id: String,
    /// Wall time of the whole request, all attempts included
    pub elapsed_ms: u64,
    pub trace: Vec<AttemptTrace>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(ok: bool, error: Option<&str>, skipped: bool) -> AttemptTrace {
        AttemptTrace {
            provider_id: "groq".into(),
            model_id: "llama".into(),
            ok,
            elapsed_ms: 42,
            error: error.map(String::from),
            status: None,
            phase: Phase::First,
            skipped,
        }
    }

    #[test]
    fn test_trace_display() {
        assert_eq!(
            trace(false, Some("timeout error: no response"), false).to_string(),
            "[phase 1] groq:llama (42 ms): timeout error: no response"
        );
        assert_eq!(trace(true, None, false).to_string(), "[phase 1] groq:llama (42 ms): ok");
        assert_eq!(
            trace(false, None, true).to_string(),
            "[phase 1] groq:llama: skipped (cooling down)"
        );
    }

    #[test]
    fn test_options_to_completion() {
        let options = AskOptions::new()
            .with_system("sys")
            .with_max_tokens(10)
            .with_image(ImageRef::url("https://example.com/a.png"));
        let request = options.to_completion("hello");

        assert_eq!(request.prompt, "hello");
        assert_eq!(request.system.as_deref(), Some("sys"));
        assert_eq!(request.max_tokens, Some(10));
        assert!(request.has_images());
    }
}
