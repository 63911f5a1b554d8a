use thiserror::Error;

/// Failure of any operation the job client performs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Caller's fault; rejected before any network or fixture activity.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    /// Session token was rejected; it has already been cleared.
    #[error("Session expired")]
    AuthExpired,

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Http { status: u16, detail: Option<String> },

    /// Server explicitly reported the job as failed.
    #[error("Assessment failed: {0}")]
    JobFailed(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::Timeout | ApiError::AuthExpired | ApiError::ServiceUnavailable
        )
    }

    /// Whether presenting a "try again" affordance makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Timeout | ApiError::ServiceUnavailable)
    }

    /// Message fit for an end user. Never empty.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation(msg) => msg.clone(),
            ApiError::Transport(_) => "Could not reach the assessment service. Please check your connection and try again.".to_string(),
            ApiError::Timeout => "The assessment service took too long to respond. Please try again.".to_string(),
            ApiError::AuthExpired => "Your session has expired. Please sign in again.".to_string(),
            ApiError::ServiceUnavailable => "Service unavailable. Please try again later.".to_string(),
            ApiError::NotFound(detail) if !detail.trim().is_empty() => detail.clone(),
            ApiError::NotFound(_) => "The requested item was not found.".to_string(),
            ApiError::Http { detail: Some(detail), .. } if !detail.trim().is_empty() => detail.clone(),
            ApiError::Http { status, .. } => format!("The request failed (HTTP {status}). Please try again."),
            ApiError::JobFailed(detail) if !detail.trim().is_empty() => detail.clone(),
            ApiError::JobFailed(_) => assessment::GENERIC_FAILURE.to_string(),
            ApiError::Decode(_) => "The service returned an unexpected response.".to_string(),
            ApiError::Config(msg) => msg.clone(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}
