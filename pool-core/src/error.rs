use thiserror::Error;

/// Core error types for the job-management core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Daemon startup error: {0}")]
    DaemonStartup(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Transient poll error: {0}")]
    TransientPoll(#[source] Box<Error>),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::TransientPoll(_) => true,
            Error::Daemon(_) => true,
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Config(_) => "config",
            Error::DaemonStartup(_) => "daemon_startup",
            Error::Daemon(_) => "daemon",
            Error::TransientPoll(_) => "transient_poll",
            Error::Authorization(_) => "authorization",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
            Error::Other(_) => "other",
        }
    }

    /// Wrap a failure raised inside one poll iteration
    pub fn transient(inner: Error) -> Self {
        match inner {
            Error::TransientPoll(_) => inner,
            other => Error::TransientPoll(Box::new(other)),
        }
    }
}

/// Sink for errors that are suppressed rather than propagated.
///
/// The job broadcaster hands every failed poll iteration to its reporter
/// and then carries on with the next tick.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &Error);
}

/// Reports suppressed errors through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, error: &Error) {
        tracing::error!(
            category = error.category(),
            recoverable = error.is_recoverable(),
            "{}",
            error
        );
    }
}
