/// Stitchflow: workflow orchestration engine
///
/// Main entry point for the stitchflow server. Initializes configuration and
/// starts the HTTP server.

use stitchflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Background execution at POST /execute
/// - Inline execution at POST /execute/wait
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from STITCHFLOW_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
