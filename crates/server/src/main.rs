use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod api;
mod config;
mod middleware;
mod session;

use config::{AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "orats-server")]
#[command(about = "ORATS MCP server over streamable HTTP", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "orats-mcp.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bearer token required on /mcp
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orats_server=info,orats_mcp=info,orats_core=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting ORATS MCP server (HTTP)");

    // Load configuration
    let config = ServerConfig::load(&args.config)?;
    let upstream = config.upstream_config()?;
    if upstream.api_token.is_none() {
        tracing::warn!("ORATS_API_TOKEN not set; tool calls will fail until it is configured");
    }

    let auth_token = args.auth_token.filter(|t| !t.is_empty());
    if auth_token.is_none() {
        tracing::warn!("AUTH_TOKEN not set; the /mcp endpoint is unauthenticated");
    }

    let state = AppState::new(&config, upstream, auth_token)?;

    let addr = format!("{}:{}", args.host, args.port);
    api::serve(&addr, state).await?;

    Ok(())
}
