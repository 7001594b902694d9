//! Gateway REST client.
//!
//! One `reqwest::Client` per session, bearer token attached per request so a
//! refreshing credential provider is picked up immediately. 4xx/5xx bodies
//! carry `{"detail": "..."}`; that text is surfaced in the transport error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{NotificationId, Ride, RideId};
use crate::session::Session;
use crate::transport::{NotificationList, NotificationPoll, RideApi};

#[derive(Debug, Deserialize)]
struct DetailBody {
    detail: Option<String>,
}

/// Map a non-success response to a transport error, preferring the server's
/// `detail` text over the raw body.
fn error_from_response(status: StatusCode, body: &str) -> SyncError {
    let detail = serde_json::from_str::<DetailBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        });

    SyncError::Transport {
        status: Some(status.as_u16()),
        detail,
    }
}

pub struct RestTransport {
    client: Client,
    base_url: String,
    session: Session,
}

impl RestTransport {
    pub fn new(base_url: &str, session: Session, config: &SyncConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(SyncError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(&self, response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }

    async fn get(&self, path: &str) -> Result<Response, SyncError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.session.bearer_token())
            .send()
            .await?;
        self.check(response).await
    }

    async fn post(&self, path: &str, body: Option<serde_json::Value>) -> Result<Response, SyncError> {
        let mut request = self
            .client
            .post(self.url(path))
            .bearer_auth(self.session.bearer_token());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        self.check(response).await
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SyncError> {
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::MalformedPayload(format!("{e} in {}", truncate(&body, 200))))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl RideApi for RestTransport {
    async fn create_ride(&self, origin: &str, destination: &str) -> Result<Ride, SyncError> {
        debug!(origin, destination, "creating ride");
        let response = self
            .post(
                "/api/rides/",
                Some(json!({ "origin": origin, "destination": destination })),
            )
            .await?;
        Self::json(response).await
    }

    async fn list_rides(&self) -> Result<Vec<Ride>, SyncError> {
        let response = self.get("/api/rides/").await?;
        Self::json(response).await
    }

    async fn accept_ride(&self, id: RideId) -> Result<Ride, SyncError> {
        let response = self.post(&format!("/api/rides/{id}/accept/"), None).await?;
        Self::json(response).await
    }

    async fn reject_ride(&self, id: RideId) -> Result<Ride, SyncError> {
        let response = self.post(&format!("/api/rides/{id}/reject/"), None).await?;
        Self::json(response).await
    }

    async fn complete_ride(&self, id: RideId) -> Result<Ride, SyncError> {
        let response = self
            .post(&format!("/api/rides/{id}/complete/"), None)
            .await?;
        Self::json(response).await
    }

    async fn cancel_ride(&self, id: RideId, reason: &str) -> Result<Ride, SyncError> {
        let response = self
            .post(
                &format!("/api/rides/{id}/cancel/"),
                Some(json!({ "reason": reason })),
            )
            .await?;
        Self::json(response).await
    }

    async fn list_notifications(&self) -> Result<NotificationList, SyncError> {
        let response = self.get("/api/notifications/").await?;
        Self::json(response).await
    }

    async fn poll_notifications(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<NotificationPoll, SyncError> {
        let path = match since {
            Some(since) => format!(
                "/api/notifications/poll/?since={}",
                since.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
            None => "/api/notifications/poll/".to_string(),
        };
        let response = self.get(&path).await?;
        Self::json(response).await
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<(), SyncError> {
        self.post(&format!("/api/notifications/{id}/mark_as_read/"), None)
            .await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        self.post("/api/notifications/mark_all_as_read/", None)
            .await?;
        Ok(())
    }
}

// Notifications embed ride references under two different keys depending on
// gateway version; the alias on the model covers both. Exercised here against
// captured response shapes.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_response_prefers_detail() {
        let err = error_from_response(
            StatusCode::FORBIDDEN,
            r#"{"detail": "Only chauffeurs can accept rides"}"#,
        );
        match err {
            SyncError::Transport { status, detail } => {
                assert_eq!(status, Some(403));
                assert_eq!(detail, "Only chauffeurs can accept rides");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_from_response_falls_back_to_body_then_reason() {
        let err = error_from_response(StatusCode::BAD_GATEWAY, "upstream unavailable");
        match err {
            SyncError::Transport { status, detail } => {
                assert_eq!(status, Some(502));
                assert_eq!(detail, "upstream unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = error_from_response(StatusCode::NOT_FOUND, "");
        match err {
            SyncError::Transport { detail, .. } => assert_eq!(detail, "Not Found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_notification_list_parsing() {
        let body = r#"{
            "count": 2,
            "unread_count": 1,
            "notifications": [
                {
                    "id": 2,
                    "notification_type": "ride_accepted",
                    "ride": 17,
                    "title": "Ride Accepted",
                    "message": "A driver accepted your ride",
                    "is_read": false,
                    "created_at": "2024-05-01T12:05:00Z"
                },
                {
                    "id": 1,
                    "notification_type": "ride_requested",
                    "ride": 17,
                    "title": "Ride Requested",
                    "message": "Your ride was requested",
                    "is_read": true,
                    "created_at": "2024-05-01T12:00:00Z"
                }
            ]
        }"#;

        let list: NotificationList = serde_json::from_str(body).unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.unread_count, 1);
        assert_eq!(list.notifications[0].ride_id, 17);
    }

    #[test]
    fn test_poll_response_parsing() {
        let body = r#"{
            "count": 0,
            "notifications": [],
            "timestamp": "2024-05-01T12:10:00.123456Z"
        }"#;

        let poll: NotificationPoll = serde_json::from_str(body).unwrap();
        assert_eq!(poll.count, 0);
        assert_eq!(
            poll.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "2024-05-01T12:10:00.123456Z"
        );
    }

    #[test]
    fn test_ride_array_parsing() {
        let body = r#"[
            {
                "id": 1,
                "origin": "A",
                "destination": "B",
                "status": "requested",
                "passenger_id": 3,
                "driver_id": null,
                "price": null,
                "created_at": "2024-05-01T12:00:00Z",
                "updated_at": "2024-05-01T12:00:00Z"
            }
        ]"#;

        let rides: Vec<Ride> = serde_json::from_str(body).unwrap();
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].status, crate::models::RideStatus::Requested);
    }
}
