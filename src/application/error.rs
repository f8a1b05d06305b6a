//! Error types for the sink pipeline.

use thiserror::Error;

/// Error produced by a sink transport.
///
/// Concrete [`SinkWriter`](crate::application::ports::SinkWriter)s return this;
/// the managed sink wraps it with the sink name.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Free-form failure
    #[error("{0}")]
    Message(String),
    /// I/O failure from the underlying transport
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WriteError {
    /// Build a free-form error.
    pub fn msg(reason: impl Into<String>) -> Self {
        WriteError::Message(reason.into())
    }
}

/// Error raised by sink, dispatcher and front-end operations.
///
/// Cloneable so the same error can be latched as a sink's error state and
/// handed to every listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink must be opened before logging
    #[error("sink '{sink}' is not open")]
    NotOpen {
        /// Sink name
        sink: String,
    },
    /// The sink is latched in error and its retry interval has not elapsed
    #[error("sink '{sink}' is not ready: {reason}")]
    NotReady {
        /// Sink name
        sink: String,
        /// Last recorded error
        reason: String,
    },
    /// Opening the transport failed
    #[error("failed to open sink '{sink}': {reason}")]
    Open {
        /// Sink name
        sink: String,
        /// Transport error text
        reason: String,
    },
    /// Writing to the transport failed
    #[error("failed to write to sink '{sink}': {reason}")]
    Write {
        /// Sink name
        sink: String,
        /// Transport error text
        reason: String,
    },
    /// Flushing the transport failed
    #[error("failed to flush sink '{sink}': {reason}")]
    Flush {
        /// Sink name
        sink: String,
        /// Transport error text
        reason: String,
    },
    /// Closing the transport failed
    #[error("failed to close sink '{sink}': {reason}")]
    Close {
        /// Sink name
        sink: String,
        /// Transport error text
        reason: String,
    },
    /// The envelope has no target sink
    #[error("envelope has no target sink")]
    NoTarget,
    /// The dispatcher has been shut down and refuses new work
    #[error("dispatcher '{pool}' is shut down")]
    ShutDown {
        /// Dispatcher name
        pool: String,
    },
    /// A blocking operation was abandoned before it completed
    #[error("blocking operation on '{pool}' was interrupted")]
    Interrupted {
        /// Dispatcher name
        pool: String,
    },
    /// A worker thread could not be started
    #[error("failed to start worker for '{pool}': {reason}")]
    Spawn {
        /// Dispatcher name
        pool: String,
        /// OS error text
        reason: String,
    },
    /// The error was recorded and delivered to the sink's error listeners
    #[error("{0} (reported to listeners)")]
    Handled(Box<SinkError>),
}

impl SinkError {
    /// Whether a listener already took responsibility for this error.
    pub fn is_handled(&self) -> bool {
        matches!(self, SinkError::Handled(_))
    }

    /// The error without the listener wrapper.
    pub fn root(&self) -> &SinkError {
        match self {
            SinkError::Handled(inner) => inner.root(),
            other => other,
        }
    }
}

/// Error returned when building a pipeline component fails.
///
/// This is the only error class allowed to abort startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Worker pool size must be greater than zero
    #[error("pool size must be greater than 0")]
    ZeroPoolSize,
    /// Queue capacity must be greater than zero
    #[error("queue capacity must be greater than 0")]
    ZeroCapacity,
    /// Signal wait timeout must be greater than zero
    #[error("signal timeout must be greater than 0")]
    ZeroSignalTimeout,
    /// Pool or sink names must not be empty
    #[error("name must not be empty")]
    EmptyName,
    /// A managed sink needs a writer
    #[error("no sink writer configured")]
    MissingWriter,
    /// A buffered front-end needs a downstream sink
    #[error("no downstream sink configured")]
    MissingSink,
    /// A front-end factory needs a downstream sink factory
    #[error("no downstream sink factory configured")]
    MissingSinkFactory,
    /// A front-end needs a dispatcher
    #[error("no dispatcher configured")]
    MissingDispatcher,
    /// The dispatcher could not start its threads
    #[error("failed to start dispatcher: {0}")]
    Start(#[source] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handled_wraps_and_unwraps() {
        let inner = SinkError::Write {
            sink: "file".to_string(),
            reason: "disk full".to_string(),
        };
        let handled = SinkError::Handled(Box::new(inner.clone()));

        assert!(handled.is_handled());
        assert!(!inner.is_handled());
        assert_eq!(handled.root(), &inner);
        assert_eq!(
            handled.to_string(),
            "failed to write to sink 'file': disk full (reported to listeners)"
        );
    }

    #[test]
    fn test_write_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: WriteError = io.into();
        assert_eq!(err.to_string(), "pipe closed");
        assert_eq!(WriteError::msg("boom").to_string(), "boom");
    }

    #[test]
    fn test_build_error_display() {
        assert_eq!(
            BuildError::MissingSinkFactory.to_string(),
            "no downstream sink factory configured"
        );
        assert_eq!(BuildError::ZeroPoolSize.to_string(), "pool size must be greater than 0");
    }
}
