// Standalone MCP server binary (stdio transport)

use anyhow::{Context, Result};
use orats_core::{UpstreamClient, UpstreamConfig};
use orats_mcp::{CallDispatcher, McpServer, StdioTransport};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing. Stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("ORATS MCP Server starting...");

    let config = UpstreamConfig::from_env().context("Invalid upstream configuration")?;
    if config.api_token.is_none() {
        tracing::warn!("ORATS_API_TOKEN not set; tool calls will fail until it is provided");
    }

    let client = UpstreamClient::new(config).context("Failed to create upstream client")?;
    let dispatcher = Arc::new(CallDispatcher::new(Arc::new(client)));

    tracing::info!("Registered {} tools", dispatcher.catalog().len());
    tracing::info!("ORATS MCP Server running on stdio");

    StdioTransport::new(McpServer::new(dispatcher))
        .run()
        .await
        .context("Stdio transport failed")?;

    Ok(())
}
