//! Weather MCP server.
//!
//! Usage:
//!   weather-server                          # stdio (default)
//!   weather-server stdio
//!   weather-server http --addr 127.0.0.1:8080

use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tokio::signal::ctrl_c;
use tracing::info;
use weather_mcp::{CALL_TIMEOUT, OPEN_METEO_URL, OpenMeteo, Result, weather_server};

#[derive(Parser)]
#[command(name = "weather-server")]
#[command(about = "MCP server exposing a getTemperature tool", long_about = None)]
/// CLI options for the weather server.
struct Cli {
    /// Log filter used when RUST_LOG is unset. Logs go to stderr.
    #[arg(long, env = "WEATHER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Base URL of the Open-Meteo compatible forecast API.
    #[arg(long, env = "WEATHER_API_URL", default_value = OPEN_METEO_URL)]
    weather_url: String,

    /// Seconds to wait for a client's reply to sampling and ping requests.
    #[arg(long, env = "WEATHER_TIMEOUT", default_value_t = CALL_TIMEOUT.as_secs())]
    timeout: u64,

    #[command(subcommand)]
    /// Transport to serve on.
    command: Option<Commands>,
}

#[derive(Subcommand)]
/// Supported transports.
enum Commands {
    /// Serve one client on stdin/stdout
    Stdio,
    /// Serve clients over HTTP with server-sent events
    Http {
        /// Address to bind to
        #[arg(long, env = "WEATHER_ADDR", default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    weather_mcp::init_tracing(&cli.log_level);

    let source = Arc::new(OpenMeteo::with_base_url(&cli.weather_url)?);
    let server = weather_server(source)?.with_timeout(Duration::from_secs(cli.timeout));

    match cli.command.unwrap_or(Commands::Stdio) {
        Commands::Stdio => {
            info!("Serving on stdio");
            server.serve_stdio().await?;
        }
        Commands::Http { addr } => {
            let handle = server.serve_http(addr).await?;
            info!("Serving on {}", handle.sse_url());

            ctrl_c().await.map_err(mcplink::Error::from)?;
            info!("Shutting down HTTP server");
            handle.stop().await?;
        }
    }

    Ok(())
}
