//! Ride lifecycle state machine.
//!
//! Pure logic: which transitions exist, who may trigger them, and how a
//! server-reported record reconciles with the local copy. No I/O here; the
//! coordinator owns all side effects.
//!
//! Lifecycle: `requested → offered → accepted → completed`, with `cancelled`
//! reachable from every non-terminal state. A rejected offer returns the
//! ride to `requested` so the matcher can find another driver.

use tracing::warn;

use crate::error::SyncError;
use crate::models::{Ride, RideAction, RideStatus, Role};

/// Outcome of reconciling a server record against the local snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Server record accepted; the snapshot should store this ride.
    Updated(Ride),
    /// Server record matches the local copy; nothing to do.
    Unchanged,
    /// Server record would regress a terminal ride; it was ignored.
    StaleIgnored,
}

/// Role permission table. Requesters own the request/cancel pair; fulfillers
/// own accept/reject/complete.
fn permitted(role: Role, action: RideAction) -> bool {
    match role {
        Role::Passenger => matches!(action, RideAction::Request | RideAction::Cancel),
        Role::Driver => matches!(
            action,
            RideAction::Accept | RideAction::Reject | RideAction::Complete
        ),
    }
}

/// Validate a transition and return the resulting state.
///
/// Fails with [`SyncError::TransitionDenied`] when the action is not defined
/// for the current state or the actor's role may not trigger it. The server
/// enforces the same table; this guard exists so bad commands fail locally
/// without a round trip.
pub fn validate_transition(
    current: RideStatus,
    action: RideAction,
    role: Role,
) -> Result<RideStatus, SyncError> {
    let denied = || SyncError::TransitionDenied {
        state: current,
        action,
        role,
    };

    if !permitted(role, action) {
        return Err(denied());
    }

    let next = match (current, action) {
        // The server lets a driver accept before the matcher marks the ride
        // offered, so the client mirrors that.
        (RideStatus::Requested, RideAction::Accept) => RideStatus::Accepted,
        (RideStatus::Offered, RideAction::Accept) => RideStatus::Accepted,
        (RideStatus::Offered, RideAction::Reject) => RideStatus::Requested,
        (RideStatus::Accepted, RideAction::Complete) => RideStatus::Completed,
        (RideStatus::Requested, RideAction::Cancel)
        | (RideStatus::Offered, RideAction::Cancel)
        | (RideStatus::Accepted, RideAction::Cancel) => RideStatus::Cancelled,
        // `request` creates a ride; it is never a transition of an existing
        // one. Terminal states accept nothing.
        _ => return Err(denied()),
    };

    Ok(next)
}

/// Reconcile a server-supplied ride record with the local copy.
///
/// The server always wins, with one exception: once the local copy is
/// terminal, a non-terminal server record is a stale read from an older
/// poll cycle and is ignored rather than regressing the ride.
pub fn apply_server_state(local: Option<&Ride>, server: Ride) -> MergeOutcome {
    let Some(local) = local else {
        return MergeOutcome::Updated(server);
    };

    if local.status.is_terminal() && !server.status.is_terminal() {
        warn!(
            ride_id = server.id,
            local_status = %local.status,
            server_status = %server.status,
            "ignoring stale server record for terminal ride"
        );
        return MergeOutcome::StaleIgnored;
    }

    if *local == server {
        MergeOutcome::Unchanged
    } else {
        MergeOutcome::Updated(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ride(status: RideStatus) -> Ride {
        let driver_id = match status {
            RideStatus::Accepted | RideStatus::Completed => Some(9),
            _ => None,
        };
        Ride {
            id: 1,
            origin: "A".into(),
            destination: "B".into(),
            status,
            passenger_id: 3,
            driver_id,
            price: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert_eq!(
            validate_transition(RideStatus::Offered, RideAction::Accept, Role::Driver).unwrap(),
            RideStatus::Accepted
        );
        assert_eq!(
            validate_transition(RideStatus::Accepted, RideAction::Complete, Role::Driver).unwrap(),
            RideStatus::Completed
        );
        assert_eq!(
            validate_transition(RideStatus::Requested, RideAction::Cancel, Role::Passenger)
                .unwrap(),
            RideStatus::Cancelled
        );
    }

    #[test]
    fn test_accept_from_requested_mirrors_server() {
        assert_eq!(
            validate_transition(RideStatus::Requested, RideAction::Accept, Role::Driver).unwrap(),
            RideStatus::Accepted
        );
    }

    #[test]
    fn test_reject_returns_ride_to_requested() {
        assert_eq!(
            validate_transition(RideStatus::Offered, RideAction::Reject, Role::Driver).unwrap(),
            RideStatus::Requested
        );
    }

    #[test]
    fn test_undefined_actions_are_denied() {
        // Completing a ride that was never accepted.
        let err =
            validate_transition(RideStatus::Requested, RideAction::Complete, Role::Driver)
                .unwrap_err();
        assert!(matches!(err, SyncError::TransitionDenied { .. }));

        // Terminal states accept nothing.
        for action in [
            RideAction::Accept,
            RideAction::Reject,
            RideAction::Complete,
            RideAction::Cancel,
        ] {
            let role = if action == RideAction::Cancel {
                Role::Passenger
            } else {
                Role::Driver
            };
            assert!(validate_transition(RideStatus::Completed, action, role).is_err());
            assert!(validate_transition(RideStatus::Cancelled, action, role).is_err());
        }
    }

    #[test]
    fn test_role_permissions_are_enforced() {
        // Passengers never accept/reject/complete.
        assert!(validate_transition(RideStatus::Offered, RideAction::Accept, Role::Passenger)
            .is_err());
        assert!(
            validate_transition(RideStatus::Accepted, RideAction::Complete, Role::Passenger)
                .is_err()
        );
        // Drivers never cancel or re-request.
        assert!(
            validate_transition(RideStatus::Accepted, RideAction::Cancel, Role::Driver).is_err()
        );
        assert!(
            validate_transition(RideStatus::Requested, RideAction::Request, Role::Passenger)
                .is_err()
        );
    }

    #[test]
    fn test_server_wins_for_new_and_advanced_rides() {
        let server = ride(RideStatus::Offered);
        assert_eq!(
            apply_server_state(None, server.clone()),
            MergeOutcome::Updated(server.clone())
        );

        let local = ride(RideStatus::Requested);
        assert_eq!(
            apply_server_state(Some(&local), server.clone()),
            MergeOutcome::Updated(server)
        );
    }

    #[test]
    fn test_terminal_rides_never_regress() {
        let local = ride(RideStatus::Completed);
        let stale = ride(RideStatus::Accepted);
        assert_eq!(
            apply_server_state(Some(&local), stale),
            MergeOutcome::StaleIgnored
        );

        let local = ride(RideStatus::Cancelled);
        let stale = ride(RideStatus::Offered);
        assert_eq!(
            apply_server_state(Some(&local), stale),
            MergeOutcome::StaleIgnored
        );
    }

    #[test]
    fn test_identical_server_record_is_unchanged() {
        let local = ride(RideStatus::Accepted);
        assert_eq!(
            apply_server_state(Some(&local), local.clone()),
            MergeOutcome::Unchanged
        );
    }

    #[test]
    fn test_conflicting_terminal_states_follow_server() {
        // Both terminal but different: the server is authoritative.
        let local = ride(RideStatus::Cancelled);
        let server = ride(RideStatus::Completed);
        assert_eq!(
            apply_server_state(Some(&local), server.clone()),
            MergeOutcome::Updated(server)
        );
    }
}
