use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("gave up after {attempts} attempt(s), cumulative backoff exceeded the configured budget")]
    RetryBudgetExceeded { attempts: u32 },

    #[error("model returned status {status} after {attempts} attempt(s): {body}")]
    Model { status: u16, attempts: u32, body: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("content blocked by provider safety filter: {0}")]
    Safety(String),

    #[error("tool '{name}' error: {message}")]
    Tool { name: String, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
