use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sw_gateway::api;
use sw_gateway::config::Config;
use sw_gateway::state::AppState;

#[derive(Parser)]
#[command(name = "switchboard", about = "LLM agent orchestration gateway")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway (default).
    Serve,
    /// Inspect or validate the configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Validate,
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            serve(Arc::new(config)).await
        }
        Some(Command::Config { command }) => {
            let config = Config::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            match command {
                ConfigCommand::Validate => {
                    println!("configuration OK ({})", cli.config.display());
                }
                ConfigCommand::Show => {
                    println!("server.bind = {}", config.server.bind);
                    println!("llm.base_url = {}", config.llm.base_url);
                    println!("llm.model = {}", config.llm.model);
                    for source in &config.tool_sources {
                        println!(
                            "tool_source {} <- {} ({:?})",
                            source.id,
                            source.spec_path.display(),
                            source.creation_strategy
                        );
                    }
                }
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sw_gateway=debug,sw_agents=debug")),
        )
        .init();
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let state = AppState::build(config)
        .await
        .context("building application state")?;

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "switchboard listening");

    axum::serve(listener, app).await.context("server error")
}
