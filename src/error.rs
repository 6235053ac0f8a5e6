//! Error types for notify-hub.

/// Top-level error type for the long-running tasks (pipeline, dashboard).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Ingestion queue submission errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("submission cancelled by shutdown")]
    Cancelled,

    #[error("ingestion queue closed")]
    Closed,
}

/// Source listener errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Source {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Classifier errors. Always recoverable from the processor's perspective.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classification cancelled")]
    Cancelled,

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Notifier errors. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification cancelled")]
    Cancelled,

    #[error("{transport} request failed: {reason}")]
    SendFailed { transport: String, reason: String },

    #[error("{transport} rejected notification: {reason}")]
    Rejected { transport: String, reason: String },
}

/// Calendar event creation errors. Only a rejected access token is retried,
/// once, after a refresh.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar request cancelled")]
    Cancelled,

    #[error("Calendar request failed: {0}")]
    RequestFailed(String),

    #[error("Calendar authorization failed: {0}")]
    Auth(String),

    #[error("Calendar API returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
