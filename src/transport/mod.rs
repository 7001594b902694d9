//! Transport seams between the sync core and the gateway.
//!
//! The coordinator and scheduler only ever talk to the [`RideApi`] and
//! [`StreamSource`] traits; the REST implementation lives in [`rest`], and
//! tests substitute in-memory fakes.

pub mod rest;
pub mod streams;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::models::{Notification, NotificationId, Ride, RideId};

/// Full notification listing, as returned by `GET /api/notifications/`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub count: usize,
    #[serde(default)]
    pub unread_count: usize,
}

/// Incremental notification poll, as returned by
/// `GET /api/notifications/poll/?since=…`. `timestamp` is the server clock
/// at response time and becomes the next poll's cursor.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPoll {
    pub notifications: Vec<Notification>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Commands and reads against the ride gateway.
///
/// Mutating calls return the server's updated ride record; the coordinator
/// applies it through the normal reconciliation path.
#[async_trait]
pub trait RideApi: Send + Sync {
    async fn create_ride(&self, origin: &str, destination: &str) -> Result<Ride, SyncError>;
    async fn list_rides(&self) -> Result<Vec<Ride>, SyncError>;
    async fn accept_ride(&self, id: RideId) -> Result<Ride, SyncError>;
    async fn reject_ride(&self, id: RideId) -> Result<Ride, SyncError>;
    async fn complete_ride(&self, id: RideId) -> Result<Ride, SyncError>;
    async fn cancel_ride(&self, id: RideId, reason: &str) -> Result<Ride, SyncError>;

    async fn list_notifications(&self) -> Result<NotificationList, SyncError>;
    /// `since` of `None` lets the server apply its default window.
    async fn poll_notifications(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<NotificationPoll, SyncError>;
    async fn mark_notification_read(&self, id: NotificationId) -> Result<(), SyncError>;
    async fn mark_all_notifications_read(&self) -> Result<(), SyncError>;
}

/// One batch of updates for a stream, however it arrived.
#[derive(Debug, Clone)]
pub enum StreamBatch {
    Rides(Vec<Ride>),
    Notifications {
        items: Vec<Notification>,
        /// Server-supplied cursor for incremental polls, when the source
        /// has one.
        server_time: Option<DateTime<Utc>>,
    },
}

/// A source of updates for one stream. Poll-only sources implement
/// `poll_once`; push-capable sources also hand out a subscription. The
/// scheduler drives either or both through the same loop.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Stream identity for logs.
    fn name(&self) -> &'static str;

    /// Fetch the current batch once.
    async fn poll_once(&self) -> Result<StreamBatch, SyncError>;

    /// Long-lived subscription for sources that can push. Default: none.
    fn subscribe(&self) -> Option<broadcast::Receiver<StreamBatch>> {
        None
    }
}
