use rust_mcp_schema::{schema_utils::CallToolError, RpcError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No terminal session named '{0}'")]
    NotFound(String),

    #[error("Callback fault: {0}")]
    CallbackFault(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawnFailure(String),

    #[error("Command blocked: {0}")]
    CommandBlocked(String),

    #[error("Operation timed out: {0}")]
    TimeoutError(String),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    /// Numeric code used when the error crosses the host protocol boundary.
    pub fn code(&self) -> i32 {
        match self {
            AppError::InvalidArgument(_) | AppError::SerdeJsonError(_) => -32602,
            AppError::NotFound(_) => -32004,
            AppError::CommandBlocked(_) => -32001,
            AppError::ProcessSpawnFailure(_) => -32002,
            AppError::TimeoutError(_) => -32003,
            _ => -32603,
        }
    }
}

impl From<AppError> for CallToolError {
    fn from(err: AppError) -> Self {
        tracing::error!("AppError converted to CallToolError: {:?}", err);
        CallToolError::new(RpcError {
            code: err.code() as i64,
            message: err.to_string(),
            data: None,
        })
    }
}
