//! Error types shared by handlers, middleware and dispatch.

/// Error returned by handlers, middleware and [`Dispatcher::dispatch`].
///
/// Whatever a handler or middleware returns reaches the dispatch caller
/// unchanged; the dispatcher itself only produces [`Error::HandlerPanicked`]
/// and [`Error::TypeMismatch`].
///
/// [`Dispatcher::dispatch`]: crate::Dispatcher::dispatch
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Event type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Build a [`Error::HandlerFailed`] from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::HandlerFailed(message.into())
    }

    /// Wrap any error type.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of a handler, middleware or dispatch call.
pub type HandlerResult = Result<()>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_msg_display() {
        assert_eq!(Error::msg("bad!").to_string(), "Handler failed: bad!");
    }

    #[test]
    fn test_other_is_transparent() {
        let err = Error::other(DiskFull);
        assert_eq!(err.to_string(), "disk full");
        assert!(matches!(err, Error::Other(_)));
    }
}
