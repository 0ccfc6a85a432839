//! Invocation error taxonomy.

use core::fmt;
use std::sync::Arc;

/// A failure cause captured from a transport, a remote peer, or a result
/// producer.
///
/// Causes are reference-counted because a failed invocation caches its cause
/// and re-surfaces it on every later result read.
pub type RemoteCause = Arc<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the invocation core.
///
/// Interceptors return this type directly from both pipeline passes; an
/// interceptor that needs to signal an application-level failure wraps its
/// cause in [`InvocationError::RemoteFailure`].
#[derive(Debug, Clone)]
pub enum InvocationError {
    /// A pipeline operation was invoked out of order for the current pass.
    WrongPhase(&'static str),
    /// The request pass reached the end of the chain with no receiver bound.
    NoReceiverBound,
    /// The invocation is fire-and-forget; it yields no result.
    OneWay,
    /// The invocation was cancelled before a result arrived.
    Cancelled,
    /// A timed wait exceeded its deadline.
    TimedOut,
    /// The transport or the remote side produced a failure.
    RemoteFailure(RemoteCause),
}

impl InvocationError {
    /// The cause to cache for a failed invocation.
    ///
    /// A remote failure caches its inner cause so that repeated reads
    /// re-surface the same wrapped error; any other variant becomes the
    /// cause itself.
    pub(crate) fn into_cause(self) -> RemoteCause {
        match self {
            Self::RemoteFailure(cause) => cause,
            other => Arc::new(other),
        }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPhase(detail) => write!(f, "wrong phase: {detail}"),
            Self::NoReceiverBound => write!(f, "no receiver bound to invocation"),
            Self::OneWay => write!(f, "one-way invocation yields no result"),
            Self::Cancelled => write!(f, "invocation was cancelled"),
            Self::TimedOut => write!(f, "timed out waiting for invocation result"),
            Self::RemoteFailure(cause) => write!(f, "remote invocation failed: {cause}"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RemoteFailure(cause) => Some(&**cause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wraps_cause() {
        let err = InvocationError::RemoteFailure(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "wire dropped",
        )));
        let text = err.to_string();
        assert!(text.starts_with("remote invocation failed:"), "{text}");
        assert!(text.contains("wire dropped"), "{text}");
    }

    #[test]
    fn source_exposes_cause() {
        use std::error::Error as _;
        let err = InvocationError::RemoteFailure(Arc::new(std::io::Error::other("x")));
        assert!(err.source().is_some());
        assert!(InvocationError::Cancelled.source().is_none());
    }

    #[test]
    fn into_cause_unwraps_remote_failure() {
        let cause: RemoteCause = Arc::new(std::io::Error::other("x"));
        let unwrapped = InvocationError::RemoteFailure(cause.clone()).into_cause();
        assert!(Arc::ptr_eq(&cause, &unwrapped));
    }
}
