use thiserror::Error;

/// Custom error types
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Rate limited: must wait {wait_time_secs} seconds")]
    RateLimited { wait_time_secs: u64 },

    #[error("Recovery failed after {attempts} attempts: {message}")]
    RecoveryFailed { attempts: u32, message: String },

    #[error("Dataset error: {0}")]
    Dataset(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

impl ServiceError {
    /// Failures that end a protocol session (and only the session)
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ServiceError::Connection(_) | ServiceError::RecoveryFailed { .. }
        )
    }
}

impl From<config::ConfigError> for ServiceError {
    fn from(e: config::ConfigError) -> Self {
        ServiceError::Config(e.to_string())
    }
}
