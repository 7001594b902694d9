//! Core data model for the ride synchronization client.
//!
//! Everything here mirrors the gateway's wire format: snake_case enums,
//! ISO-8601 timestamps, integer identifiers assigned by the server.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Server-assigned ride identifier.
pub type RideId = i64;
/// Server-assigned user identifier.
pub type UserId = i64;
/// Server-assigned notification identifier.
pub type NotificationId = i64;

/// Ride lifecycle states.
///
/// `requested → offered → accepted → completed`, with `cancelled` reachable
/// from every non-terminal state. `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Offered,
    Accepted,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Offered => "offered",
            RideStatus::Accepted => "accepted",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions a client can attempt on a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideAction {
    Request,
    Accept,
    Reject,
    Complete,
    Cancel,
}

impl RideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideAction::Request => "request",
            RideAction::Accept => "accept",
            RideAction::Reject => "reject",
            RideAction::Complete => "complete",
            RideAction::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for RideAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client roles. Resolved once at session start; no stringly-typed role
/// checks anywhere past this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Requests rides, may cancel them.
    Passenger,
    /// Fulfils rides: accept, reject, complete.
    Driver,
}

impl Role {
    /// Parse a role string as the auth service spells it. The deployed
    /// services disagree on spelling ("PASSAGER"/"CHAUFFEUR" vs the English
    /// forms), so both are accepted. Anything else is an explicit error, not
    /// a silent default.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASSAGER" | "PASSENGER" => Ok(Role::Passenger),
            "CHAUFFEUR" | "DRIVER" => Ok(Role::Driver),
            _ => Err(SyncError::UnknownRole(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Passenger => "passenger",
            Role::Driver => "driver",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transportation request as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub origin: String,
    pub destination: String,
    pub status: RideStatus,
    pub passenger_id: UserId,
    #[serde(default)]
    pub driver_id: Option<UserId>,
    /// Assigned by the server when the ride completes.
    #[serde(default)]
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    /// Driver assignment invariant: a driver is present iff the ride is
    /// accepted or completed. A cancelled ride may or may not carry one,
    /// depending on when it was cancelled.
    pub fn assignment_consistent(&self) -> bool {
        match self.status {
            RideStatus::Accepted | RideStatus::Completed => self.driver_id.is_some(),
            RideStatus::Requested | RideStatus::Offered => self.driver_id.is_none(),
            RideStatus::Cancelled => true,
        }
    }
}

/// Lifecycle events the server notifies about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RideRequested,
    RideOffered,
    RideAccepted,
    RideRejected,
    RideCompleted,
    RideCancelled,
    /// Unknown event types deserialize here instead of failing the batch.
    #[serde(other)]
    Other,
}

/// A user-facing notification about a ride lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "notification_type")]
    pub kind: NotificationKind,
    /// Some gateway versions serialize the ride reference as `ride`.
    #[serde(alias = "ride")]
    pub ride_id: RideId,
    pub title: String,
    pub message: String,
    #[serde(rename = "is_read", default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// The authoritative local view of the ride system.
///
/// Owned by the sync coordinator; presentation collaborators only ever see
/// clones of it. Rides are keyed by id with no order guarantee; the
/// notification log is kept in descending creation order.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    pub rides: HashMap<RideId, Ride>,
    pub notifications: Vec<Notification>,
    /// Observation stamp of the newest applied rides fetch.
    pub last_rides_sync: Option<DateTime<Utc>>,
    /// Server-supplied cursor of the newest applied notification poll.
    pub last_notifications_sync: Option<DateTime<Utc>>,
}

impl SyncSnapshot {
    pub fn ride(&self, id: RideId) -> Option<&Ride> {
        self.rides.get(&id)
    }

    /// Rides ordered newest-first for presentation.
    pub fn rides_newest_first(&self) -> Vec<&Ride> {
        let mut rides: Vec<&Ride> = self.rides.values().collect();
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rides
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn notifications_for_ride(&self, ride_id: RideId) -> Vec<&Notification> {
        self.notifications
            .iter()
            .filter(|n| n.ride_id == ride_id)
            .collect()
    }
}
