//! Failure taxonomy for the synchronization core.
//!
//! Everything the library can fail with is a [`SyncError`] variant, so
//! callers match on one closed enum. The poll and connection loops catch
//! these at their boundary and keep running; command paths return them.

use thiserror::Error;

use crate::models::{RideAction, RideStatus, Role};

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Bad local input. Never reaches the transport.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The requested transition is not in the lifecycle table, or the actor's
    /// role is not permitted to trigger it.
    #[error("{role} may not {action} a {state} ride")]
    TransitionDenied {
        state: RideStatus,
        action: RideAction,
        role: Role,
    },

    /// Network or HTTP failure, with the server's `detail` text when present.
    #[error("transport error{}: {detail}", status_suffix(.status))]
    Transport { status: Option<u16>, detail: String },

    /// Server or push-channel data that could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The push channel gave up after the configured reconnect bound.
    #[error("push channel gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Role string from the auth service that maps to no known role.
    #[error("unknown role {0:?}")]
    UnknownRole(String),

    /// A push-channel send was attempted while not connected.
    #[error("push channel is not connected")]
    NotConnected,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport {
            status: err.status().map(|s| s.as_u16()),
            detail: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedPayload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::TransitionDenied {
            state: RideStatus::Requested,
            action: RideAction::Complete,
            role: Role::Driver,
        };
        assert_eq!(err.to_string(), "driver may not complete a requested ride");

        let err = SyncError::Transport {
            status: Some(403),
            detail: "Only chauffeurs can accept rides".into(),
        };
        assert_eq!(
            err.to_string(),
            "transport error (403): Only chauffeurs can accept rides"
        );

        let err = SyncError::Transport {
            status: None,
            detail: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "transport error: connection refused");
    }
}
