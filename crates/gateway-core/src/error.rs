//! Error taxonomy for the controller's public operations.

use thiserror::Error;

/// Every failure a controller operation can report.
///
/// Propagation policy:
/// - [`InvalidArgument`](GatewayError::InvalidArgument) and
///   [`InvalidState`](GatewayError::InvalidState) fail fast at the call
///   boundary with no partial side effects.
/// - [`RemoteCommunication`](GatewayError::RemoteCommunication) during a
///   credential change is reported only after any staged local state has been
///   rolled back.
/// - [`Consistency`](GatewayError::Consistency) means the remote call
///   succeeded but the matching local mutation did not (or vice versa); the
///   divergence is surfaced rather than silently resolved.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Bad caller input: empty identity, empty bus name, empty passcode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted before init, after shutdown, or a conflicting
    /// double-init.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A transport or remote call failed or timed out.
    #[error("remote communication failed: {0}")]
    RemoteCommunication(String),

    /// Remote and local state now disagree.
    #[error("local and remote state diverged: {0}")]
    Consistency(String),
}

impl GatewayError {
    /// Shorthand used at validation boundaries.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category_and_detail() {
        let e = GatewayError::invalid_argument("bus name is empty");
        assert_eq!(e.to_string(), "invalid argument: bus name is empty");

        let e = GatewayError::RemoteCommunication("join timed out".into());
        assert_eq!(e.to_string(), "remote communication failed: join timed out");
    }
}
