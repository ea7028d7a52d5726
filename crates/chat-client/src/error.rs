//! Client error types

use chat_common::ConfigError;
use chat_gateway::GatewayError;
use chat_rest::RestError;
use thiserror::Error;

/// Result alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("client is already connected")]
    AlreadyConnected,
}

impl ClientError {
    /// The REST error underneath, if any
    pub fn as_rest(&self) -> Option<&RestError> {
        match self {
            Self::Rest(e) => Some(e),
            _ => None,
        }
    }
}
