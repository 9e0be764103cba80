use std::result::Result as StdResult;

use thiserror::Error;

/// Errors raised by the weather demo.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol or session failure.
    #[error(transparent)]
    Mcp(#[from] mcplink::Error),

    /// The forecast service could not be reached or answered badly.
    #[error("Network error: {0}")]
    Network(String),

    /// The language model provider failed.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Mcp(mcplink::Error::InvalidConfiguration(format!(
            "invalid URL: {err}"
        )))
    }
}

/// Tool handlers answer in `mcplink` errors. Anything that is not already a
/// protocol error becomes an internal error, which the server reports as an
/// `isError` tool result.
impl From<Error> for mcplink::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Mcp(e) => e,
            other => mcplink::Error::InternalError(other.to_string()),
        }
    }
}

/// Result alias for the weather demo.
pub type Result<T> = StdResult<T, Error>;
