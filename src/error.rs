use std::result::Result as StdResult;
use thiserror::Error;
use reqwest;
use serde_json;
use anyhow;
use ethers::providers::ProviderError;
use std::io;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Explorer API error: {0}")]
    ExplorerError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("API invalid format: {0}")]
    ApiInvalidFormat(String),
    #[error("RPC error: {0}")]
    RpcError(String),
    #[error("Request abandoned before dispatch")]
    RequestAbandoned,
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ApiInvalidFormat(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::InternalError(err.to_string())
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::RpcError(err.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::StorageError(err.to_string())
    }
}

pub type Result<T> = StdResult<T, Error>;
