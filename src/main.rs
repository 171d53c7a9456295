//! fal.ai HiDream-I1-Full MCP Server
//!
//! MCP server exposing the fal.ai hidream-i1-full image generation model.

use anyhow::Result;
use clap::Parser;
use fal_hidream_mcp::{Config, HidreamServer, TransportArgs, transport};

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "fal-hidream-mcp")]
#[command(about = "MCP server for fal.ai HiDream-I1-Full image generation")]
struct Args {
    /// Transport configuration
    #[command(flatten)]
    transport: TransportArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr: stdout belongs to the stdio MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::from_env();
    if config.api_key.is_none() {
        tracing::warn!(
            "FAL_KEY environment variable is not set; every tool call will return a \
             configuration error until it is configured"
        );
    }
    tracing::info!(images_dir = %config.images_dir.display(), "Configuration loaded");

    let server = HidreamServer::new(&config);

    let transport_mode = args.transport.into_transport();
    tracing::info!(transport = %transport_mode, "Starting fal-hidream-mcp server");

    transport::serve(server, transport_mode).await?;

    tracing::info!("Server stopped");
    Ok(())
}
