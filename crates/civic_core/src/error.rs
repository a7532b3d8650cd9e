use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Call exceeded its per-request deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Non-success HTTP status
    #[error("API error ({status}): {message}")]
    ApiStatus { status: u16, message: String },

    /// Upstream envelope reported `"status": "ERROR"`
    #[error("{operation} rejected upstream: {message}")]
    Rejected { operation: String, message: String },

    /// Payload did not have the expected shape
    #[error("Failed to parse {operation} response: {message}")]
    ParseError { operation: String, message: String },
}

impl ApiError {
    pub fn parse(operation: &str, message: impl Into<String>) -> Self {
        ApiError::ParseError {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::parse("json", err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
