//! degpt-gateway - OpenAI- and Claude-compatible gateway for DeGPT
//!
//! Serves chat completions from the DeGPT upstream behind the OpenAI and
//! Claude wire formats, with model discovery, health-based model selection
//! and per-session conversation memory.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use degpt_gateway::clock::SystemClock;
use degpt_gateway::config::Config;
use degpt_gateway::registry::ModelRegistry;

#[derive(Parser)]
#[command(name = "degpt-gateway")]
#[command(about = "OpenAI- and Claude-compatible gateway for DeGPT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Run one model discovery pass and list the results
    Models {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("degpt_gateway={level},tower_http={level}", level = level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut cfg = Config::load(&config)?;
            init_tracing(&cfg.logging.level);
            tracing::info!(config = %config, "Loaded configuration");

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            degpt_gateway::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            let cfg = Config::load(&config)?;
            init_tracing(&cfg.logging.level);

            println!("Configuration OK ({})", config);
            println!("  listen:          {}", cfg.server.listen);
            println!("  chat paths:      {}", cfg.server.chat_paths.join(", "));
            println!(
                "  inbound auth:    {}",
                if cfg.server.auth_token.is_some() {
                    "required"
                } else {
                    "open"
                }
            );
            println!("  endpoints:       {}", cfg.upstream.endpoints.join(", "));
            println!("  default model:   {}", cfg.upstream.default_model);
            println!("  model cache:     {}s", cfg.registry.cache_duration_secs);
            println!("  session ttl:     {}s", cfg.session.ttl_secs);
            Ok(())
        }

        Commands::Models { config } => {
            let cfg = Config::load(&config)?;
            init_tracing(&cfg.logging.level);

            let client = reqwest::Client::builder()
                .user_agent(cfg.upstream.user_agent.clone())
                .build()?;
            let registry = ModelRegistry::new(client, cfg.registry.clone(), Arc::new(SystemClock));
            registry.refresh_if_stale().await;

            let snapshot = registry.snapshot();
            println!(
                "{} models (provider {}, version {})",
                snapshot.data.len(),
                snapshot.provider,
                snapshot.version
            );
            for model in &snapshot.data {
                println!(
                    "  {:<32} {:<6} {}",
                    model.id,
                    if model.supports_image() { "image" } else { "text" },
                    model.display_name
                );
            }
            Ok(())
        }
    }
}
