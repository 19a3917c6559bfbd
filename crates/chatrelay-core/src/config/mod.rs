//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::health::HealthPolicy;
use crate::providers::{
    AdapterKind, CredentialResolver, EnvCredentials, Intent, ProviderSpec, Tier,
};
use crate::routing::RouterConfig;

/// chatrelay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RoutingConfig,
    pub health: HealthConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub long_output_threshold: u32,
    pub retry_hard_failures: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub alpha: f64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub slow_threshold_ms: u64,
    pub record_ttl_secs: u64,
    /// Health database file; defaults to the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// `provider:model` tokens in declaration order
    pub order: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ProviderOverride>,
}

/// Per-entry adjustments to the catalog defaults.
///
/// `id` is either a full `provider:model` token or a bare provider name,
/// which applies to every model of that provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOverride {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_reliability: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_vision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_long_context: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<Vec<Intent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Never honoured; present only so a stray key is rejected loudly
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            attempt_timeout_ms: 20_000,
            long_output_threshold: 2048,
            retry_hard_failures: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            failure_threshold: 3,
            cooldown_secs: 900,
            slow_threshold_ms: 2500,
            record_ttl_secs: 7 * 24 * 60 * 60,
            database: None,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: vec![
                "groq:llama-3.3-70b-versatile".to_string(),
                "gemini:gemini-2.0-flash".to_string(),
                "openrouter:meta-llama/llama-3.3-70b-instruct:free".to_string(),
                "mistral:mistral-small-latest".to_string(),
                "cloudflare:@cf/meta/llama-3.1-8b-instruct".to_string(),
            ],
            overrides: Vec::new(),
        }
    }
}

impl ProviderOverride {
    fn applies_to(&self, spec: &ProviderSpec) -> bool {
        spec.descriptor.matches(self.id.trim())
    }

    fn apply(&self, spec: &mut ProviderSpec) {
        let descriptor = &mut spec.descriptor;
        if let Some(tier) = self.tier {
            descriptor.tier = tier;
        }
        if let Some(reliability) = self.base_reliability {
            descriptor.base_reliability = reliability.min(10);
        }
        if let Some(vision) = self.supports_vision {
            descriptor.capabilities.supports_vision = vision;
        }
        if let Some(long_context) = self.supports_long_context {
            descriptor.capabilities.supports_long_context = long_context;
        }
        if let Some(strengths) = &self.strengths {
            descriptor.strengths = strengths.iter().copied().collect();
        }
        if let Some(base_url) = &self.base_url {
            spec.base_url = Some(base_url.clone());
        }
    }
}

fn redact(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        "***".to_string()
    } else {
        let suffix: String = key.chars().skip(count - 4).collect();
        format!("***{}", suffix)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("CHATRELAY_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("chatrelay")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory for persistent state such as the health database
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("CHATRELAY_DATA_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::data_dir()
                .ok_or_else(|| anyhow!("Could not determine data directory"))?
                .join("chatrelay")
        };
        Ok(dir)
    }

    /// Health database path, honouring `health.database`
    pub fn health_database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.health.database {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("health.db")),
        }
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Invalid config file: {}", path.display()))?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Parse and validate TOML text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.router.max_attempts == 0 {
            return Err(anyhow!("router.max_attempts must be at least 1"));
        }
        if self.router.attempt_timeout_ms == 0 {
            return Err(anyhow!("router.attempt_timeout_ms must be greater than 0"));
        }
        if !(self.health.alpha > 0.0 && self.health.alpha <= 1.0) {
            return Err(anyhow!(
                "health.alpha must be in (0, 1], got {}",
                self.health.alpha
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(anyhow!("health.failure_threshold must be at least 1"));
        }
        if self.health.record_ttl_secs == 0 {
            return Err(anyhow!("health.record_ttl_secs must be greater than 0"));
        }

        let specs = self.parsed_specs()?;
        for entry in &self.providers.overrides {
            if entry.api_key.is_some() {
                return Err(anyhow!(
                    "API keys must be provided via environment variables, not stored in configuration (override '{}')",
                    entry.id
                ));
            }
            if !specs.iter().any(|spec| entry.applies_to(spec)) {
                return Err(anyhow!(
                    "Override '{}' does not match any entry in providers.order",
                    entry.id
                ));
            }
        }
        Ok(())
    }

    fn parsed_specs(&self) -> anyhow::Result<Vec<ProviderSpec>> {
        self.providers
            .order
            .iter()
            .map(|token| {
                ProviderSpec::from_token(token)
                    .with_context(|| format!("Invalid entry in providers.order: '{}'", token))
            })
            .collect()
    }

    /// Provider specs in declaration order with overrides applied.
    ///
    /// Overrides apply in file order, so a later entry wins. Entries disabled
    /// by an override are left out.
    pub fn provider_specs(&self) -> anyhow::Result<Vec<ProviderSpec>> {
        let mut specs = Vec::new();
        for mut spec in self.parsed_specs()? {
            let mut enabled = true;
            for entry in &self.providers.overrides {
                if !entry.applies_to(&spec) {
                    continue;
                }
                entry.apply(&mut spec);
                if let Some(flag) = entry.enabled {
                    enabled = flag;
                }
            }
            if enabled {
                specs.push(spec);
            }
        }
        Ok(specs)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_attempts: self.router.max_attempts,
            attempt_timeout: Duration::from_millis(self.router.attempt_timeout_ms),
            long_output_threshold: self.router.long_output_threshold,
            retry_hard_failures: self.router.retry_hard_failures,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            alpha: self.health.alpha,
            failure_threshold: self.health.failure_threshold,
            cooldown: Duration::from_secs(self.health.cooldown_secs),
            slow_threshold_ms: self.health.slow_threshold_ms as f64,
            record_ttl: Duration::from_secs(self.health.record_ttl_secs),
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Router settings
            "router.max_attempts" => Ok(self.router.max_attempts.to_string()),
            "router.attempt_timeout_ms" => Ok(self.router.attempt_timeout_ms.to_string()),
            "router.long_output_threshold" => Ok(self.router.long_output_threshold.to_string()),
            "router.retry_hard_failures" => Ok(self.router.retry_hard_failures.to_string()),

            // Health settings
            "health.alpha" => Ok(self.health.alpha.to_string()),
            "health.failure_threshold" => Ok(self.health.failure_threshold.to_string()),
            "health.cooldown_secs" => Ok(self.health.cooldown_secs.to_string()),
            "health.slow_threshold_ms" => Ok(self.health.slow_threshold_ms.to_string()),
            "health.record_ttl_secs" => Ok(self.health.record_ttl_secs.to_string()),
            "health.database" => Ok(self.health_database_path()?.display().to_string()),

            // Provider settings
            "providers.order" => Ok(self.providers.order.join(", ")),

            // API keys (special handling - show redacted)
            _ if key.starts_with("api_key.") => {
                let name = &key["api_key.".len()..];
                let kind: AdapterKind = name.parse().map_err(|e: String| anyhow!(e))?;
                match EnvCredentials.api_key(kind) {
                    Some(secret) => Ok(redact(&secret)),
                    None => Ok(format!("(not set - use {} env var)", kind.api_key_env())),
                }
            }

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `chatrelay config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // Router settings
            "router.max_attempts" => {
                let attempts: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_attempts value: {}", value))?;
                if attempts == 0 {
                    return Err(anyhow!("max_attempts must be at least 1"));
                }
                self.router.max_attempts = attempts;
            }
            "router.attempt_timeout_ms" => {
                let timeout: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid attempt_timeout_ms value: {}", value))?;
                if timeout == 0 {
                    return Err(anyhow!("attempt_timeout_ms must be greater than 0"));
                }
                self.router.attempt_timeout_ms = timeout;
            }
            "router.long_output_threshold" => {
                self.router.long_output_threshold = value
                    .parse()
                    .with_context(|| format!("Invalid long_output_threshold value: {}", value))?;
            }
            "router.retry_hard_failures" => {
                self.router.retry_hard_failures = value
                    .parse()
                    .with_context(|| format!("Invalid retry_hard_failures value: {}", value))?;
            }

            // Health settings
            "health.alpha" => {
                let alpha: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid alpha value: {}", value))?;
                if !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(anyhow!("alpha must be in (0, 1]"));
                }
                self.health.alpha = alpha;
            }
            "health.failure_threshold" => {
                let threshold: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid failure_threshold value: {}", value))?;
                if threshold == 0 {
                    return Err(anyhow!("failure_threshold must be at least 1"));
                }
                self.health.failure_threshold = threshold;
            }
            "health.cooldown_secs" => {
                self.health.cooldown_secs = value
                    .parse()
                    .with_context(|| format!("Invalid cooldown_secs value: {}", value))?;
            }
            "health.slow_threshold_ms" => {
                self.health.slow_threshold_ms = value
                    .parse()
                    .with_context(|| format!("Invalid slow_threshold_ms value: {}", value))?;
            }
            "health.record_ttl_secs" => {
                let ttl: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid record_ttl_secs value: {}", value))?;
                if ttl == 0 {
                    return Err(anyhow!("record_ttl_secs must be greater than 0"));
                }
                self.health.record_ttl_secs = ttl;
            }
            "health.database" => {
                self.health.database = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            // Provider settings
            "providers.order" => {
                let order: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                for token in &order {
                    ProviderSpec::from_token(token)
                        .with_context(|| format!("Invalid provider token: {}", token))?;
                }
                self.providers.order = order;
            }

            // API keys cannot be set via config
            _ if key.starts_with("api_key.") => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the provider's environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `chatrelay config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut keys: Vec<String> = [
            "router.max_attempts",
            "router.attempt_timeout_ms",
            "router.long_output_threshold",
            "router.retry_hard_failures",
            "health.alpha",
            "health.failure_threshold",
            "health.cooldown_secs",
            "health.slow_threshold_ms",
            "health.record_ttl_secs",
            "health.database",
            "providers.order",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        keys.extend(AdapterKind::ALL.iter().map(|kind| format!("api_key.{}", kind)));

        keys.into_iter()
            .map(|key| {
                let value = self.get(&key)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.router.max_attempts, 4);
        assert_eq!(config.router.attempt_timeout_ms, 20_000);
        assert_eq!(config.health.alpha, 0.2);
        assert_eq!(config.health.cooldown_secs, 900);
        assert!(config.validate().is_ok());

        let policy = config.health_policy();
        assert_eq!(policy, HealthPolicy::default());
        assert_eq!(config.router_config(), RouterConfig::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [router]
            max_attempts = 2

            [providers]
            order = ["groq:llama-3.1-8b-instant", "gemini:gemini-2.0-flash"]
            "#,
        )
        .unwrap();

        assert_eq!(config.router.max_attempts, 2);
        assert_eq!(config.router.attempt_timeout_ms, 20_000);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.provider_specs().unwrap().len(), 2);
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let config = Config::from_toml(
            r#"
            [providers]
            order = ["groq:llama-3.1-8b-instant", "groq:llama-3.3-70b-versatile", "mistral:mistral-small-latest"]

            [[providers.overrides]]
            id = "groq"
            tier = "paid"
            base_reliability = 9

            [[providers.overrides]]
            id = "groq:llama-3.3-70b-versatile"
            base_reliability = 4
            strengths = ["reasoning"]
            base_url = "http://localhost:9999/v1"

            [[providers.overrides]]
            id = "mistral"
            enabled = false
            "#,
        )
        .unwrap();

        let specs = config.provider_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].descriptor.tier, Tier::Paid);
        assert_eq!(specs[0].descriptor.base_reliability, 9);
        assert_eq!(specs[1].descriptor.base_reliability, 4);
        assert!(specs[1].descriptor.strengths.contains(&Intent::Reasoning));
        assert_eq!(specs[1].base_url.as_deref(), Some("http://localhost:9999/v1"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.health.alpha = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.router.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.order = vec!["acme:model".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.overrides.push(ProviderOverride {
            id: "deepseek".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_in_file_is_rejected() {
        let result = Config::from_toml(
            r#"
            [providers]
            order = ["groq:llama-3.1-8b-instant"]

            [[providers.overrides]]
            id = "groq"
            api_key = "gsk-secret"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_get_set_roundtrip() {
        let mut config = Config::default();
        config.set("router.max_attempts", "6").unwrap();
        config.set("health.alpha", "0.5").unwrap();
        config
            .set("providers.order", "groq:a, gemini:b")
            .unwrap();

        assert_eq!(config.get("router.max_attempts").unwrap(), "6");
        assert_eq!(config.get("health.alpha").unwrap(), "0.5");
        assert_eq!(config.get("providers.order").unwrap(), "groq:a, gemini:b");

        assert!(config.set("health.alpha", "1.5").is_err());
        assert!(config.set("providers.order", "nonsense").is_err());
        assert!(config.set("api_key.groq", "secret").is_err());
        assert!(config.set("nope", "1").is_err());
        assert!(config.get("nope").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.providers.overrides.push(ProviderOverride {
            id: "groq".to_string(),
            tier: Some(Tier::Cheap),
            ..Default::default()
        });

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("api_key"));
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact("gsk-123456"), "***3456");
        assert_eq!(redact("ключ-секретx"), "***ретx");
        assert_eq!(redact("ключ"), "***");
    }

    #[test]
    fn test_later_override_reenables_provider() {
        let config = Config::from_toml(
            r#"
            [providers]
            order = ["groq:llama-3.3-70b-versatile", "mistral:mistral-small-latest"]

            [[providers.overrides]]
            id = "groq"
            enabled = false

            [[providers.overrides]]
            id = "groq:llama-3.3-70b-versatile"
            enabled = true
            base_reliability = 2
            "#,
        )
        .unwrap();

        let specs = config.provider_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].descriptor.key(), "groq:llama-3.3-70b-versatile");
        assert_eq!(specs[0].descriptor.base_reliability, 2);
    }
}
