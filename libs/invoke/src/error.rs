use std::time::Duration;

use relay_core::Identity;
use thiserror::Error;

/// Why an invocation did not produce an [`OperationResult`].
///
/// These are failures of the call itself, never of the remote operation: a
/// remote failure arrives as a result whose status is not `Ok`.
///
/// [`OperationResult`]: relay_core::OperationResult
#[derive(Error, Debug, Clone)]
pub enum InvocationError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    /// A transport read or write did not finish in time. The stream may hold
    /// a partial frame, so the connection is not reused.
    #[error("Transport {0} timeout exceeded")]
    TransportTimeout(&'static str),

    #[error("Invocation canceled")]
    Canceled,

    #[error("Invalid request: {0}")]
    InvalidRequest(relay_core::Error),

    #[error("Malformed message: {0}")]
    Malformed(relay_core::Error),

    #[error("Frame rejected: {0}")]
    FrameRejected(String),

    #[error("Operation `{operation}` needs a twoway proxy")]
    TwowayOnly { operation: String },
}

impl InvocationError {
    /// Whether the call never completed because of the connection, as opposed
    /// to a problem with this one request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_)
                | Self::ConnectFailed(_)
                | Self::NotConnected
                | Self::Timeout(_)
                | Self::TransportTimeout(_)
        )
    }
}

impl From<relay_fabric::Error> for InvocationError {
    fn from(e: relay_fabric::Error) -> Self {
        match e {
            relay_fabric::Error::InvalidFrame(msg) => Self::FrameRejected(msg),
            relay_fabric::Error::ConnectionClosed => Self::ConnectionLost("connection closed".to_string()),
            relay_fabric::Error::Timeout(what) => Self::TransportTimeout(what),
            other => Self::ConnectionLost(other.to_string()),
        }
    }
}

/// Failure to change the servant binding table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("Identity `{0}` is already bound")]
    AlreadyBound(Identity),
}

pub type Result<T> = std::result::Result<T, InvocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_timeout_stays_a_timeout() {
        let error = InvocationError::from(relay_fabric::Error::Timeout("Send"));
        assert!(matches!(error, InvocationError::TransportTimeout("Send")));
        assert!(error.is_transport());
        assert_eq!(error.to_string(), "Transport Send timeout exceeded");
    }

    #[test]
    fn fabric_errors_map_by_kind() {
        let rejected = InvocationError::from(relay_fabric::Error::InvalidFrame("too big".into()));
        assert!(matches!(rejected, InvocationError::FrameRejected(_)));
        assert!(!rejected.is_transport());

        let closed = InvocationError::from(relay_fabric::Error::ConnectionClosed);
        assert!(matches!(closed, InvocationError::ConnectionLost(_)));
    }
}
