use thiserror::Error;

use crate::store::{ItemId, ItemStatus};

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Model gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Transport error{}: {message}", status_suffix(.status))]
    Transport { status: Option<u16>, message: String },

    #[error("Quota exhausted: {message}")]
    Quota { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("API key is not configured")]
    MissingApiKey,

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<GatewayError>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl GatewayError {
    /// Whether another attempt of the same round may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. }
            | GatewayError::Quota { .. }
            | GatewayError::InvalidResponse { .. }
            | GatewayError::Http(_) => true,
            GatewayError::Cancelled
            | GatewayError::MissingApiKey
            | GatewayError::Exhausted { .. } => false,
        }
    }

    /// Whether this error (or the last attempt behind it) was a user cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            GatewayError::Cancelled => true,
            GatewayError::Exhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    /// The underlying error once retry wrapping is peeled off.
    pub fn root(&self) -> &GatewayError {
        match self {
            GatewayError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// Item store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("News item not found: {id}")]
    ItemNotFound { id: ItemId },

    #[error("Invalid transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Analysis already running for item {id}")]
    AlreadyRunning { id: ItemId },

    #[error("No analysis running for item {id}")]
    NotRunning { id: ItemId },

    #[error("Item {id} cannot be compared with itself")]
    SelfComparison { id: ItemId },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("Invalid parameters for {method}: {message}")]
    InvalidParameters { method: String, message: String },

    #[error("Command failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::Transport {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Transport error (503): unavailable");

        let err = GatewayError::Transport {
            status: None,
            message: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "Transport error: connection reset");

        let err = GatewayError::Exhausted {
            attempts: 3,
            last: Box::new(GatewayError::Quota {
                message: "429".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Gave up after 3 attempts: Quota exhausted: 429"
        );
    }

    #[test]
    fn test_gateway_error_retryable() {
        assert!(GatewayError::Transport {
            status: Some(500),
            message: String::new()
        }
        .is_retryable());
        assert!(GatewayError::Quota {
            message: String::new()
        }
        .is_retryable());
        assert!(!GatewayError::Cancelled.is_retryable());
        assert!(!GatewayError::MissingApiKey.is_retryable());
    }

    #[test]
    fn test_gateway_error_root_and_cancelled() {
        let err = GatewayError::Exhausted {
            attempts: 2,
            last: Box::new(GatewayError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(matches!(err.root(), GatewayError::Cancelled));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ItemNotFound { id: ItemId(7) };
        assert_eq!(err.to_string(), "News item not found: 7");

        let err = StoreError::InvalidTransition {
            id: ItemId(2),
            from: ItemStatus::Completed,
            to: ItemStatus::Analyzing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for item 2: completed -> analyzing"
        );
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownMethod {
            method: "news/explode".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown method: news/explode");

        let err = McpError::InvalidParameters {
            method: "analysis/start".to_string(),
            message: "missing id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameters for analysis/start: missing id"
        );
    }

    #[test]
    fn test_conversions_to_app_error() {
        let app_err: AppError = StoreError::NotRunning { id: ItemId(1) }.into();
        assert!(matches!(app_err, AppError::Store(_)));

        let app_err: AppError = GatewayError::MissingApiKey.into();
        assert!(matches!(app_err, AppError::Gateway(_)));

        let mcp_err: McpError = AppError::Config {
            message: "test error".to_string(),
        }
        .into();
        assert!(mcp_err.to_string().contains("Configuration error"));
    }
}
