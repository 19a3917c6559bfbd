//! chatrelay CLI - route prompts across interchangeable LLM backends

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chatrelay_core::config::Config;
use chatrelay_core::health::{HealthStore, SqliteKvStore};
use chatrelay_core::providers::{EnvCredentials, ImageRef, build_adapters};
use chatrelay_core::routing::{AskOptions, RouteRequirements, Router, infer_intent};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(author, version, about = "Multi-provider LLM relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt to the best available provider
    Ask {
        /// Prompt text
        prompt: String,
        /// System instruction
        #[arg(long)]
        system: Option<String>,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
        /// Maximum output tokens
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Image URL or local file (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,
        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Provider id to try first (repeatable)
        #[arg(long)]
        prefer: Vec<String>,
    },

    /// Show provider health
    Health {
        /// `provider:model` ids (default: every enabled provider)
        ids: Vec<String>,
    },

    /// Show configured providers in ranked order
    Providers {
        /// Rank as if for this prompt
        #[arg(long, default_value = "")]
        prompt: String,
        /// Rank for a request carrying images
        #[arg(long)]
        vision: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let directive = if cli.quiet {
        "chatrelay=warn"
    } else {
        "chatrelay=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            prompt,
            system,
            temperature,
            max_tokens,
            images,
            timeout_ms,
            prefer,
        } => {
            let mut options = AskOptions {
                system,
                temperature,
                max_tokens,
                timeout_ms,
                prefer,
                ..Default::default()
            };
            for image in &images {
                options.images.push(load_image(image)?);
            }
            cmd_ask(&prompt, options, cli.format, cli.quiet).await
        }

        Commands::Health { ids } => cmd_health(&ids, cli.format).await,

        Commands::Providers { prompt, vision } => {
            cmd_providers(&prompt, vision, cli.format).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Setup
// ============================================================================

async fn build_router(config: &Config) -> anyhow::Result<Router> {
    let specs = config.provider_specs()?;
    let adapters = build_adapters(&specs, &EnvCredentials)?;

    let db_path = config.health_database_path()?;
    let kv = SqliteKvStore::connect(&db_path)
        .await
        .with_context(|| format!("Failed to open health database: {}", db_path.display()))?;
    if let Err(e) = kv.purge_expired().await {
        warn!(error = %e, "Failed to purge expired health records");
    }

    let health = HealthStore::new(Arc::new(kv)).with_policy(config.health_policy());

    Ok(Router::builder()
        .config(config.router_config())
        .adapters(adapters)
        .health(health)
        .build())
}

/// URL-like arguments pass through; anything else is read as a local file
fn load_image(arg: &str) -> anyhow::Result<ImageRef> {
    let lower = arg.to_lowercase();
    if ["http://", "https://", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return Ok(ImageRef::url(arg));
    }

    let path = Path::new(arg);
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    let mime_type = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => anyhow::bail!("Unsupported image type: {}", path.display()),
    };
    debug!(path = %path.display(), bytes = bytes.len(), "Loaded image");
    Ok(ImageRef::from_bytes(mime_type, &bytes))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_ask(
    prompt: &str,
    options: AskOptions,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let router = build_router(&config).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match router.ask_with_cancel(prompt, options, cancel).await {
        Ok(result) => {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Text => {
                    println!("{}", result.text);
                    if !quiet {
                        eprintln!(
                            "\n-- {}:{} in {} ms ({} attempt(s))",
                            result.provider_id,
                            result.model_id,
                            result.elapsed_ms,
                            result.trace.iter().filter(|t| !t.skipped).count()
                        );
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            if format == OutputFormat::Json {
                let body = serde_json::json!({
                    "error": e.to_string(),
                    "code": e.code(),
                    "trace": e.trace(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
            if let Some(suggestion) = e.suggestion() {
                if !quiet {
                    eprintln!("Hint: {}", suggestion);
                }
            }
            Err(e.into())
        }
    }
}

async fn cmd_health(ids: &[String], format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let router = build_router(&config).await?;
    let summaries = router.health_summary(ids).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            if summaries.is_empty() {
                println!("No providers enabled. Set provider API keys to enable them.");
            }
            for s in summaries {
                let mut flags = Vec::new();
                if s.is_cooling_down {
                    flags.push("cooling down");
                }
                if s.is_slow {
                    flags.push("slow");
                }
                println!(
                    "  {} - ewma {:.0} ms, {} consecutive failure(s){}",
                    s.id,
                    s.ewma_latency_ms,
                    s.consecutive_failures,
                    if flags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", flags.join(", "))
                    }
                );
            }
        }
    }
    Ok(())
}

async fn cmd_providers(prompt: &str, vision: bool, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let router = build_router(&config).await?;

    let requirements = RouteRequirements::new(infer_intent(prompt, vision)).with_vision(vision);
    let ranked = router.rank_candidates(&requirements).await;

    let enabled = router.adapter_ids();
    let disabled: Vec<String> = config
        .provider_specs()?
        .into_iter()
        .filter(|spec| !enabled.contains(&spec.descriptor.key()))
        .map(|spec| format!("{} (set {})", spec.descriptor.key(), spec.kind.api_key_env()))
        .collect();

    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "intent": requirements.intent,
                "ranked": ranked,
                "disabled": disabled,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            println!("Intent: {}", requirements.intent);
            if ranked.is_empty() {
                println!("No providers enabled.");
            }
            for (position, candidate) in ranked.iter().enumerate() {
                let mut flags = Vec::new();
                if candidate.cooling_down {
                    flags.push("cooling down");
                }
                if candidate.slow {
                    flags.push("slow");
                }
                println!(
                    "  {}. {} (score {}){}",
                    position + 1,
                    candidate.id,
                    candidate.score,
                    if flags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", flags.join(", "))
                    }
                );
            }
            if !disabled.is_empty() {
                println!("Disabled:");
                for entry in disabled {
                    println!("  {}", entry);
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_with_repeated_flags() {
        let cli = Cli::try_parse_from([
            "chatrelay",
            "ask",
            "hello",
            "--prefer",
            "groq",
            "--prefer",
            "gemini:gemini-2.0-flash",
            "--image",
            "https://example.com/a.png",
            "--timeout-ms",
            "5000",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask {
                prompt,
                prefer,
                images,
                timeout_ms,
                ..
            } => {
                assert_eq!(prompt, "hello");
                assert_eq!(prefer, vec!["groq", "gemini:gemini-2.0-flash"]);
                assert_eq!(images.len(), 1);
                assert_eq!(timeout_ms, Some(5000));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_load_image_url_and_file() {
        assert_eq!(
            load_image("https://example.com/cat.png").unwrap(),
            ImageRef::url("https://example.com/cat.png")
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.PNG");
        std::fs::write(&path, b"abc").unwrap();
        let image = load_image(path.to_str().unwrap()).unwrap();
        assert_eq!(image.as_url(), "data:image/png;base64,YWJj");

        let other = dir.path().join("notes.txt");
        std::fs::write(&other, b"x").unwrap();
        assert!(load_image(other.to_str().unwrap()).is_err());
    }
}
