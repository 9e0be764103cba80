//! Weather MCP client.
//!
//! Spawns `weather-server` (or dials one over HTTP), answers its sampling
//! requests with an OpenAI-compatible model and prints the tool's answer.
//!
//! Usage:
//!   weather-client --latitude 52.37 --longitude 4.89
//!   weather-client --url http://127.0.0.1:8080/sse
//!   weather-client --server-command ./weather-server --server-arg stdio

use std::{env, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use mcplink::{Capabilities, Client};
use serde_json::json;
use tokio::process::Command;
use tracing::{info, warn};
use weather_mcp::{
    CALL_TIMEOUT, CannedModel, Error, GET_TEMPERATURE, LanguageModel, OpenAiCompatible, Result,
    WeatherClientHandler,
};

#[derive(Parser)]
#[command(name = "weather-client")]
#[command(about = "Ask a weather MCP server for the temperature and a poem", long_about = None)]
/// CLI options for the weather client.
struct Cli {
    /// Server program to spawn. Defaults to `weather-server` next to this
    /// binary.
    #[arg(long, env = "WEATHER_SERVER_COMMAND", conflicts_with = "url")]
    server_command: Option<String>,

    /// Extra argument for the spawned server (repeatable).
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// SSE endpoint of a running HTTP server instead of spawning one.
    #[arg(long, env = "WEATHER_SERVER_URL")]
    url: Option<String>,

    /// Do not declare the sampling capability.
    #[arg(long)]
    no_sampling: bool,

    /// Latitude to look up.
    #[arg(long, default_value_t = 52.37, allow_hyphen_values = true)]
    latitude: f64,

    /// Longitude to look up.
    #[arg(long, default_value_t = 4.89, allow_hyphen_values = true)]
    longitude: f64,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    llm_url: String,

    /// Model used for sampling.
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    /// API key. Without one, sampling answers with a canned poem.
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Seconds to wait for each call to the server.
    #[arg(long, default_value_t = CALL_TIMEOUT.as_secs())]
    timeout: u64,

    /// Log filter used when RUST_LOG is unset. Logs go to stderr.
    #[arg(long, env = "WEATHER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn model(&self) -> Result<Arc<dyn LanguageModel>> {
        match &self.llm_api_key {
            Some(key) => Ok(Arc::new(
                OpenAiCompatible::new(&self.llm_url, &self.llm_model)?.with_api_key(key),
            )),
            None => {
                warn!("LLM_API_KEY is not set, answering sampling requests with a canned poem");
                Ok(Arc::new(CannedModel::default()))
            }
        }
    }

    fn server_command(&self) -> Result<Command> {
        let program: PathBuf = match &self.server_command {
            Some(program) => program.into(),
            None => env::current_exe()
                .map_err(mcplink::Error::from)?
                .with_file_name(format!("weather-server{}", env::consts::EXE_SUFFIX)),
        };
        let mut command = Command::new(program);
        command.args(&self.server_args);
        Ok(command)
    }
}

async fn run(cli: Cli) -> Result<String> {
    let mut capabilities = Capabilities::default().with_progress();
    if !cli.no_sampling {
        capabilities = capabilities.with_sampling();
    }
    let mut client = Client::new("weather-client", env!("CARGO_PKG_VERSION"))
        .with_handler(WeatherClientHandler::from_arc(cli.model()?))
        .with_capabilities(capabilities)
        .with_timeout(Duration::from_secs(cli.timeout));

    let init = match &cli.url {
        Some(url) => client.connect_http(url).await?,
        None => client.connect_process(cli.server_command()?).await?,
    };
    info!(
        "Server {} {} speaks protocol {}",
        init.server_info.name, init.server_info.version, init.protocol_version
    );

    let outcome = call_weather(&client, cli.latitude, cli.longitude).await;
    client.close().await;
    outcome
}

async fn call_weather<C>(client: &Client<C>, latitude: f64, longitude: f64) -> Result<String>
where
    C: mcplink::ClientHandler + 'static,
{
    let tools = client.list_tools().await?;
    if tools.get(GET_TEMPERATURE).is_none() {
        return Err(Error::Mcp(mcplink::Error::UnknownTool(GET_TEMPERATURE.into())));
    }
    let result = client
        .call_tool_with_progress(
            GET_TEMPERATURE,
            json!({ "latitude": latitude, "longitude": longitude }),
            "weather-1",
        )
        .await?;
    if result.is_error() {
        return Err(Error::Mcp(mcplink::Error::InternalError(format!(
            "{GET_TEMPERATURE} failed: {}",
            result.all_text()
        ))));
    }
    Ok(result.all_text())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    weather_mcp::init_tracing(&cli.log_level);

    match run(cli).await {
        Ok(answer) => {
            println!("{answer}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("weather-client: {e}");
            ExitCode::FAILURE
        }
    }
}
