//! chatrelay Core Library
//!
//! This crate provides the multi-provider routing core for chatrelay:
//! - Provider adapters (OpenAI-compatible, Gemini, Cloudflare Workers AI)
//! - Health tracking (EWMA latency, failure streaks, cooldown) over a
//!   namespaced key/value store (in-memory or SQLite)
//! - Ranking and the two-phase attempt loop
//! - TOML configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod providers;
pub mod routing;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ProviderError, ProviderErrorKind, Result};
    pub use crate::health::{HealthStore, HealthSummary};
    pub use crate::providers::{ImageRef, ProviderAdapter, ProviderDescriptor};
    pub use crate::routing::{AskOptions, Router, RouterConfig, RouterResult};
}
