use thiserror::Error;

use crate::logging::LoggingError;

/// Unified result type for the scheduler crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced by the scheduler and its collaborators.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("event handler table full ({capacity} event names)")]
    HandlerTableFull { capacity: usize },
    #[error("invalid event name `{0}`")]
    InvalidEventName(String),
    #[error("event `{0}` has no handlers")]
    UnknownEvent(String),
    #[error("subscription {id} is not registered for `{event}`")]
    UnknownSubscription { event: String, id: u64 },
    #[error("render backend error: {0}")]
    Backend(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Configuration errors point at a static capacity or usage defect and end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::HandlerTableFull { .. } | SchedulerError::InvalidEventName(_)
        )
    }
}

/// Failure raised by script code running inside a task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{0}")]
    Raised(String),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl ScriptError {
    pub fn raised(message: impl Into<String>) -> Self {
        ScriptError::Raised(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ScriptError::Panicked(message)
    }
}

impl From<String> for ScriptError {
    fn from(message: String) -> Self {
        ScriptError::Raised(message)
    }
}

impl From<&str> for ScriptError {
    fn from(message: &str) -> Self {
        ScriptError::Raised(message.to_string())
    }
}
