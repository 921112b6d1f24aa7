//! Error types for the widget engine.
//!
//! Every public widget operation catches failures at its own boundary. Errors
//! are returned to the caller for inspection, but anything the visitor should
//! see has already been turned into a bot bubble by the time they surface.

use thiserror::Error;

/// Configuration problems detected while loading the widget.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field is absent or blank.
    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    /// A field carries a value of the wrong shape.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Layered application config could not be built.
    #[error("config load failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Widget error taxonomy.
#[derive(Error, Debug)]
pub enum WidgetError {
    /// Invalid or incomplete configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP request failed before a usable response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status.
    #[error("backend error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or error field.
        message: String,
    },

    /// A request exceeded its time budget.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// A stream frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No session could be established.
    #[error("No active chat session")]
    Session,

    /// The backend reported an error mid-stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// The reply stream stalled or ended before its `complete` frame.
    #[error("reply interrupted: {0}")]
    Interrupted(String),

    /// The message was empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// Another send is still in flight.
    #[error("a message is already being sent")]
    Busy,

    /// The stream was cancelled because the widget closed.
    #[error("cancelled")]
    Cancelled,

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for WidgetError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Network(err.to_string()),
        }
    }
}

impl From<url::ParseError> for WidgetError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(ConfigError::Invalid(format!("apiUrl: {err}")))
    }
}

impl WidgetError {
    /// Whether this failure happened on the wire (and is worth retrying).
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Status { .. } | Self::Timeout(_)
        )
    }
}

/// Result type alias for widget operations.
pub type Result<T> = std::result::Result<T, WidgetError>;
