//! Poll-backed stream sources over the gateway API.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::transport::{RideApi, StreamBatch, StreamSource};

/// Rides stream: every poll fetches the full set of rides visible to the
/// caller's role.
pub struct RidesStream {
    api: Arc<dyn RideApi>,
}

impl RidesStream {
    pub fn new(api: Arc<dyn RideApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StreamSource for RidesStream {
    fn name(&self) -> &'static str {
        "rides"
    }

    async fn poll_once(&self) -> Result<StreamBatch, SyncError> {
        let rides = self.api.list_rides().await?;
        Ok(StreamBatch::Rides(rides))
    }
}

/// Notifications stream with an incremental `since` cursor.
///
/// The cursor only ever advances to the timestamp the server returned with a
/// successful response — never to the client clock — so a poll that spans
/// real time leaves no gap, and a failed poll retries the same window.
pub struct NotificationsStream {
    api: Arc<dyn RideApi>,
    cursor: RwLock<Option<DateTime<Utc>>>,
}

impl NotificationsStream {
    pub fn new(api: Arc<dyn RideApi>) -> Self {
        Self {
            api,
            cursor: RwLock::new(None),
        }
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        *self.cursor.read()
    }
}

#[async_trait]
impl StreamSource for NotificationsStream {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn poll_once(&self) -> Result<StreamBatch, SyncError> {
        let since = self.cursor();
        let poll = self.api.poll_notifications(since).await?;
        *self.cursor.write() = Some(poll.timestamp);
        Ok(StreamBatch::Notifications {
            items: poll.notifications,
            server_time: Some(poll.timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NotificationList, NotificationPoll};
    use crate::models::{Notification, NotificationId, Ride, RideId};
    use parking_lot::Mutex;

    /// Records the `since` values it is called with and replays scripted
    /// responses.
    struct ScriptedApi {
        since_calls: Mutex<Vec<Option<DateTime<Utc>>>>,
        responses: Mutex<Vec<Result<NotificationPoll, SyncError>>>,
    }

    #[async_trait]
    impl RideApi for ScriptedApi {
        async fn create_ride(&self, _: &str, _: &str) -> Result<Ride, SyncError> {
            unimplemented!()
        }
        async fn list_rides(&self) -> Result<Vec<Ride>, SyncError> {
            Ok(Vec::new())
        }
        async fn accept_ride(&self, _: RideId) -> Result<Ride, SyncError> {
            unimplemented!()
        }
        async fn reject_ride(&self, _: RideId) -> Result<Ride, SyncError> {
            unimplemented!()
        }
        async fn complete_ride(&self, _: RideId) -> Result<Ride, SyncError> {
            unimplemented!()
        }
        async fn cancel_ride(&self, _: RideId, _: &str) -> Result<Ride, SyncError> {
            unimplemented!()
        }
        async fn list_notifications(&self) -> Result<NotificationList, SyncError> {
            unimplemented!()
        }
        async fn poll_notifications(
            &self,
            since: Option<DateTime<Utc>>,
        ) -> Result<NotificationPoll, SyncError> {
            self.since_calls.lock().push(since);
            self.responses.lock().remove(0)
        }
        async fn mark_notification_read(&self, _: NotificationId) -> Result<(), SyncError> {
            Ok(())
        }
        async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn notification(id: NotificationId) -> Notification {
        Notification {
            id,
            kind: crate::models::NotificationKind::RideOffered,
            ride_id: 1,
            title: "t".into(),
            message: "m".into(),
            read: false,
            created_at: "2024-05-01T10:00:00Z".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_cursor_advances_to_server_timestamp() {
        let t1: DateTime<Utc> = "2024-05-01T10:00:05Z".parse().unwrap();
        let t2: DateTime<Utc> = "2024-05-01T10:00:10Z".parse().unwrap();

        let api = Arc::new(ScriptedApi {
            since_calls: Mutex::new(Vec::new()),
            responses: Mutex::new(vec![
                Ok(NotificationPoll {
                    notifications: vec![notification(1), notification(2)],
                    count: 2,
                    timestamp: t1,
                }),
                Ok(NotificationPoll {
                    notifications: vec![],
                    count: 0,
                    timestamp: t2,
                }),
            ]),
        });

        let stream = NotificationsStream::new(api.clone());
        assert!(stream.cursor().is_none());

        stream.poll_once().await.unwrap();
        assert_eq!(stream.cursor(), Some(t1));

        stream.poll_once().await.unwrap();
        assert_eq!(stream.cursor(), Some(t2));

        // First poll had no cursor; second used the server's T1, not the
        // client clock.
        let calls = api.since_calls.lock();
        assert_eq!(*calls, vec![None, Some(t1)]);
    }

    #[tokio::test]
    async fn test_cursor_is_not_advanced_on_failure() {
        let t1: DateTime<Utc> = "2024-05-01T10:00:05Z".parse().unwrap();

        let api = Arc::new(ScriptedApi {
            since_calls: Mutex::new(Vec::new()),
            responses: Mutex::new(vec![
                Ok(NotificationPoll {
                    notifications: vec![],
                    count: 0,
                    timestamp: t1,
                }),
                Err(SyncError::Transport {
                    status: Some(502),
                    detail: "bad gateway".into(),
                }),
            ]),
        });

        let stream = NotificationsStream::new(api);
        stream.poll_once().await.unwrap();
        assert_eq!(stream.cursor(), Some(t1));

        stream.poll_once().await.unwrap_err();
        // Failed cycle retries the same window next time.
        assert_eq!(stream.cursor(), Some(t1));
    }
}
