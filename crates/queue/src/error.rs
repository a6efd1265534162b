use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration for {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("unknown lane: {lane}")]
    UnknownLane { lane: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("execution failed: {message}")]
    Execution { message: String },

    #[error("queue manager is shutting down")]
    ShuttingDown,

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_lane(lane: impl Into<String>) -> Self {
        Self::UnknownLane { lane: lane.into() }
    }

    #[must_use]
    pub fn execution(message: impl std::fmt::Display) -> Self {
        Self::Execution {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error is the cooperative cancellation signal rather than a
    /// real failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl switchyard_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

switchyard_common::impl_context!();
