use std::time::Duration;
use thiserror::Error;

/// Error types for the pool server core.
///
/// Share classifications are deliberately *not* errors; they live in
/// [`crate::share::ShareResult`] and flow back to miners as result codes.
/// Everything here is a fault contained inside a component or surfaced at
/// startup.
#[derive(Error, Debug)]
pub enum StratumError {
    // Network-related errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<StratumError>>,
    },

    #[error("Connection error: {message}")]
    Connection {
        message: String,
        remote_addr: Option<std::net::SocketAddr>,
    },

    /// The 24-bit session index space is fully allocated. The acceptor
    /// closes the new socket without a response.
    #[error("Session id space exhausted")]
    ExhaustedIds,

    // Protocol-related errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        method: Option<String>,
        request_id: Option<i64>,
    },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat {
        message: String,
        raw_data: Option<String>,
    },

    // Job-related errors
    #[error("Job decode failed: {message}")]
    JobDecode { message: String },

    /// Submitted extranonce2 hex does not match the negotiated size.
    #[error("Malformed extranonce2: {value}")]
    MalformedExtranonce2 { value: String },

    // Message bus errors
    #[error("Kafka error: {message}")]
    Kafka {
        message: String,
        topic: Option<String>,
    },

    // Storage-related errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // User API errors
    #[error("User API error: {message}")]
    UserApi { message: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON parsing error: {message}")]
    JsonParsing { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Task timeout: {timeout:?}")]
    TaskTimeout { timeout: Duration },
}

/// Configuration-specific errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid server id: {id} (must be between 1 and 255)")]
    InvalidServerId { id: u16 },

    #[error("Invalid duration: {field} = {duration:?} (must be > 0)")]
    InvalidDuration { field: String, duration: Duration },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration format: {message}")]
    InvalidFormat { message: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Simulator mode requested but STRATUM_SIMULATOR=1 is not set in the environment")]
    SimulatorNotArmed,
}

impl StratumError {
    pub fn from_io_error(err: std::io::Error) -> Self {
        StratumError::Network {
            message: err.to_string(),
            source: None,
        }
    }

    pub fn from_json_error(err: serde_json::Error) -> Self {
        StratumError::JsonParsing {
            message: err.to_string(),
        }
    }

    /// Check if this error is retryable by the owning worker task.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StratumError::Network { .. }
                | StratumError::Kafka { .. }
                | StratumError::Database { .. }
                | StratumError::UserApi { .. }
                | StratumError::TaskTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_json_error(err)
    }
}

impl From<std::io::Error> for StratumError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io_error(err)
    }
}

impl From<sea_orm::DbErr> for StratumError {
    fn from(err: sea_orm::DbErr) -> Self {
        StratumError::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rdkafka::error::KafkaError> for StratumError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        StratumError::Kafka {
            message: err.to_string(),
            topic: None,
        }
    }
}

/// Result type alias for the pool server.
pub type Result<T> = std::result::Result<T, StratumError>;
