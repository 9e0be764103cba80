//! Weather demo for `mcplink`.
//!
//! `weather-server` exposes one tool, `getTemperature`, which looks up the
//! current temperature at a coordinate and, when the client can sample,
//! asks the client's model for a poem about it. `weather-client` spawns or
//! dials the server, answers sampling requests with a configured
//! OpenAI-compatible model and prints the tool's answer.

mod error;
mod handler;
mod llm;
mod tools;
mod weather;

use tracing_subscriber::EnvFilter;
use url::Url;

pub use error::{Error, Result};
pub use handler::{WeatherClientHandler, format_logging, format_progress};
pub use llm::{CannedModel, LanguageModel, OpenAiCompatible};
pub use tools::{
    CALL_TIMEOUT, GET_TEMPERATURE, NO_SAMPLING_FALLBACK, SERVER_NAME, get_temperature,
    weather_server,
};
pub use weather::{FixedTemperature, OPEN_METEO_URL, OpenMeteo, WeatherSource};

/// Resolve `path` beneath `base`, keeping any path `base` already has.
pub(crate) fn join_url(base: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path)?)
}

/// Install a stderr `tracing` subscriber. `RUST_LOG` wins over `default`.
///
/// Stdout stays untouched so a stdio server's protocol stream is clean.
pub fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
