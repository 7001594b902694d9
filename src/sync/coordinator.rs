//! The coordinator: owns the authoritative snapshot, issues commands, and
//! reconciles everything the transports deliver.
//!
//! All snapshot mutation happens here, under a single write lock per applied
//! payload, so interleaving between the two poll streams and the push
//! channel cannot corrupt the view. Reconciliation is commutative: rides
//! follow server-wins/never-regress, notifications merge idempotently, so
//! delivery order across streams does not matter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lifecycle::{self, MergeOutcome};
use crate::models::{Notification, NotificationId, Ride, RideAction, RideId, Role, SyncSnapshot};
use crate::notify;
use crate::push::{ConnectionManager, PushEvent};
use crate::session::Session;
use crate::sync::scheduler::{BatchSink, PollingScheduler};
use crate::transport::streams::{NotificationsStream, RidesStream};
use crate::transport::{RideApi, StreamBatch};

/// Change notifications fanned out to presentation collaborators.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Ride records that changed in the snapshot.
    RidesChanged { ids: Vec<RideId> },
    /// Notifications newly added to the log.
    NotificationsAdded { ids: Vec<NotificationId> },
    /// Notifications flipped to read locally.
    NotificationsRead { ids: Vec<NotificationId> },
    /// A poll cycle or push frame failed; synchronization continues.
    StreamError {
        stream: &'static str,
        error: SyncError,
    },
    PushConnected,
    PushDisconnected,
    /// The push channel exhausted its reconnect bound. Polling still runs;
    /// the embedder may prompt for a manual reconnect.
    PushExhausted { error: SyncError },
}

/// Handles for the two running poll loops.
pub struct Pollers {
    pub rides: PollingScheduler,
    pub notifications: PollingScheduler,
}

impl Pollers {
    /// Stop both loops. In-flight responses still apply.
    pub fn stop(&self) {
        self.rides.stop();
        self.notifications.stop();
    }
}

pub struct SyncCoordinator {
    api: Arc<dyn RideApi>,
    session: Session,
    config: SyncConfig,
    snapshot: RwLock<SyncSnapshot>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(api: Arc<dyn RideApi>, session: Session, config: SyncConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            session,
            config,
            snapshot: RwLock::new(SyncSnapshot::default()),
            events,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// A point-in-time copy of the authoritative local view.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // COMMANDS
    // -------------------------------------------------------------------------

    /// Request a new ride. Passenger only; origin and destination must be
    /// non-empty. On success the server's record lands in the snapshot
    /// immediately and a rides refresh is kicked off.
    pub async fn request_ride(
        self: &Arc<Self>,
        origin: &str,
        destination: &str,
    ) -> Result<Ride, SyncError> {
        let origin = origin.trim();
        let destination = destination.trim();
        if origin.is_empty() || destination.is_empty() {
            return Err(SyncError::Validation(
                "origin and destination are required".into(),
            ));
        }
        if self.session.role() != Role::Passenger {
            return Err(SyncError::Validation(
                "only passengers may request rides".into(),
            ));
        }

        let ride = self.api.create_ride(origin, destination).await?;
        info!(ride_id = ride.id, origin, destination, "ride requested");
        self.absorb_ride(ride.clone());
        self.refresh_rides_soon();
        Ok(ride)
    }

    pub async fn accept_ride(self: &Arc<Self>, id: RideId) -> Result<Ride, SyncError> {
        self.act(id, RideAction::Accept, None).await
    }

    pub async fn reject_ride(self: &Arc<Self>, id: RideId) -> Result<Ride, SyncError> {
        self.act(id, RideAction::Reject, None).await
    }

    pub async fn complete_ride(self: &Arc<Self>, id: RideId) -> Result<Ride, SyncError> {
        self.act(id, RideAction::Complete, None).await
    }

    pub async fn cancel_ride(self: &Arc<Self>, id: RideId, reason: &str) -> Result<Ride, SyncError> {
        self.act(id, RideAction::Cancel, Some(reason)).await
    }

    /// Shared command path: validate against the local lifecycle table when
    /// the ride is known, send, absorb the confirmed record, refresh.
    ///
    /// A ride the snapshot has not seen yet skips local state validation —
    /// the snapshot may simply be behind, and the server enforces the same
    /// table anyway. Failures leave the snapshot untouched.
    async fn act(
        self: &Arc<Self>,
        id: RideId,
        action: RideAction,
        reason: Option<&str>,
    ) -> Result<Ride, SyncError> {
        let current = self.snapshot.read().rides.get(&id).map(|r| r.status);
        if let Some(current) = current {
            lifecycle::validate_transition(current, action, self.session.role())?;
        }

        let result = match action {
            RideAction::Accept => self.api.accept_ride(id).await,
            RideAction::Reject => self.api.reject_ride(id).await,
            RideAction::Complete => self.api.complete_ride(id).await,
            RideAction::Cancel => self.api.cancel_ride(id, reason.unwrap_or_default()).await,
            RideAction::Request => unreachable!("request creates rides via request_ride"),
        };

        match result {
            Ok(ride) => {
                info!(ride_id = id, action = %action, status = %ride.status, "ride command confirmed");
                self.absorb_ride(ride.clone());
                self.refresh_rides_soon();
                Ok(ride)
            }
            Err(e) => {
                warn!(ride_id = id, action = %action, error = %e, "ride command failed");
                Err(e)
            }
        }
    }

    /// Reconcile one confirmed server record into the snapshot.
    fn absorb_ride(&self, ride: Ride) {
        let id = ride.id;
        let changed = {
            let mut snap = self.snapshot.write();
            match lifecycle::apply_server_state(snap.rides.get(&id), ride) {
                MergeOutcome::Updated(ride) => {
                    snap.rides.insert(id, ride);
                    true
                }
                MergeOutcome::Unchanged | MergeOutcome::StaleIgnored => false,
            }
        };
        if changed {
            self.emit(SyncEvent::RidesChanged { ids: vec![id] });
        }
    }

    /// Out-of-band rides refresh so the UI sees a confirmed command without
    /// waiting for the next scheduled tick. Last-applied-wins makes an
    /// overlap with the scheduler harmless.
    fn refresh_rides_soon(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let issued_at = Utc::now();
            match this.api.list_rides().await {
                Ok(rides) => this.apply_rides(rides, issued_at),
                Err(error) => {
                    warn!(error = %error, "out-of-band rides refresh failed");
                    this.emit(SyncEvent::StreamError {
                        stream: "rides",
                        error,
                    });
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // INGESTION
    // -------------------------------------------------------------------------

    /// Apply a full rides payload observed at `observed_at`.
    ///
    /// Payloads older than the newest applied one are discarded wholesale
    /// (last-applied-wins per stream); individual records then go through
    /// server-wins/never-regress reconciliation. Rides absent from the
    /// payload are kept — the core never deletes.
    pub fn apply_rides(&self, rides: Vec<Ride>, observed_at: DateTime<Utc>) {
        let mut changed = Vec::new();
        {
            let mut snap = self.snapshot.write();
            if let Some(last) = snap.last_rides_sync {
                if observed_at < last {
                    debug!(
                        observed_at = %observed_at,
                        last = %last,
                        "discarding stale rides payload"
                    );
                    return;
                }
            }
            snap.last_rides_sync = Some(observed_at);

            for server in rides {
                let id = server.id;
                match lifecycle::apply_server_state(snap.rides.get(&id), server) {
                    MergeOutcome::Updated(ride) => {
                        snap.rides.insert(id, ride);
                        changed.push(id);
                    }
                    MergeOutcome::Unchanged | MergeOutcome::StaleIgnored => {}
                }
            }
        }

        if !changed.is_empty() {
            self.emit(SyncEvent::RidesChanged { ids: changed });
        }
    }

    /// Merge a notification batch into the log. `server_time` is the poll
    /// cursor when the batch came from an incremental poll.
    pub fn apply_notifications(
        &self,
        items: Vec<Notification>,
        server_time: Option<DateTime<Utc>>,
    ) {
        let added = {
            let mut snap = self.snapshot.write();
            let result = notify::merge(&snap.notifications, &items);
            snap.notifications = result.log;
            if let Some(t) = server_time {
                // The cursor only moves forward.
                if snap.last_notifications_sync.is_none_or(|last| t > last) {
                    snap.last_notifications_sync = Some(t);
                }
            }
            result.added
        };

        if !added.is_empty() {
            self.emit(SyncEvent::NotificationsAdded { ids: added });
        }
    }

    /// Sink for the polling scheduler: route batches to the right apply
    /// path, surface failures as events.
    pub fn apply_batch(
        &self,
        stream: &'static str,
        batch: Result<StreamBatch, SyncError>,
        observed_at: DateTime<Utc>,
    ) {
        match batch {
            Ok(StreamBatch::Rides(rides)) => self.apply_rides(rides, observed_at),
            Ok(StreamBatch::Notifications { items, server_time }) => {
                self.apply_notifications(items, server_time)
            }
            Err(error) => self.emit(SyncEvent::StreamError { stream, error }),
        }
    }

    // -------------------------------------------------------------------------
    // POLLING
    // -------------------------------------------------------------------------

    /// Start the two poll loops and seed the notification log with the full
    /// listing (which carries the server-side read flags).
    pub fn start_polling(self: &Arc<Self>) -> Pollers {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.api.list_notifications().await {
                Ok(list) => {
                    debug!(
                        count = list.count,
                        unread = list.unread_count,
                        "seeded notification log"
                    );
                    this.apply_notifications(list.notifications, None);
                }
                Err(error) => {
                    warn!(error = %error, "notification seed fetch failed");
                    this.emit(SyncEvent::StreamError {
                        stream: "notifications",
                        error,
                    });
                }
            }
        });

        let sink: BatchSink = {
            let this = Arc::clone(self);
            Arc::new(move |stream, batch, observed_at| this.apply_batch(stream, batch, observed_at))
        };

        Pollers {
            rides: PollingScheduler::spawn(
                Arc::new(RidesStream::new(self.api.clone())),
                self.config.rides_poll_interval(),
                sink.clone(),
            ),
            notifications: PollingScheduler::spawn(
                Arc::new(NotificationsStream::new(self.api.clone())),
                self.config.notifications_poll_interval(),
                sink,
            ),
        }
    }

    // -------------------------------------------------------------------------
    // PUSH CHANNEL
    // -------------------------------------------------------------------------

    /// Process one push-channel event.
    ///
    /// Typed ride lifecycle frames trigger an immediate rides refresh; a
    /// frame embedding a notification record merges it directly. Everything
    /// else is state passthrough for subscribers.
    pub fn on_push_message(self: &Arc<Self>, event: PushEvent) {
        match event {
            PushEvent::Connected => self.emit(SyncEvent::PushConnected),
            PushEvent::Disconnected => self.emit(SyncEvent::PushDisconnected),
            PushEvent::Typed { kind, payload } => {
                let embedded = payload
                    .get("notification")
                    .cloned()
                    .unwrap_or_else(|| payload.clone());
                if let Ok(notification) = serde_json::from_value::<Notification>(embedded) {
                    self.apply_notifications(vec![notification], None);
                }
                if kind.starts_with("ride_") {
                    debug!(kind, "push event, refreshing rides");
                    self.refresh_rides_soon();
                }
            }
            // Generic emissions duplicate the typed ones for our purposes.
            PushEvent::Message(_) => {}
            PushEvent::Malformed { detail } => self.emit(SyncEvent::StreamError {
                stream: "push",
                error: SyncError::MalformedPayload(detail),
            }),
            PushEvent::GaveUp { attempts } => self.emit(SyncEvent::PushExhausted {
                error: SyncError::ReconnectExhausted { attempts },
            }),
        }
    }

    /// Bridge a connection manager's event feed into this coordinator.
    pub fn attach_push(self: &Arc<Self>, manager: &ConnectionManager) -> JoinHandle<()> {
        let mut rx = manager.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => this.on_push_message(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "push event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // -------------------------------------------------------------------------
    // NOTIFICATION READ STATE
    // -------------------------------------------------------------------------

    /// Flip the read flag locally and tell the server in the background.
    /// The flip is not rolled back if the server call fails; read state is
    /// eventually consistent.
    pub fn mark_notification_read(self: &Arc<Self>, id: NotificationId) {
        let flipped = {
            let mut snap = self.snapshot.write();
            match snap.notifications.iter_mut().find(|n| n.id == id) {
                Some(n) if !n.read => {
                    n.read = true;
                    true
                }
                _ => false,
            }
        };
        if flipped {
            self.emit(SyncEvent::NotificationsRead { ids: vec![id] });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.api.mark_notification_read(id).await {
                warn!(notification_id = id, error = %e, "mark-as-read not acknowledged");
            }
        });
    }

    /// Bulk variant of [`Self::mark_notification_read`].
    pub fn mark_all_notifications_read(self: &Arc<Self>) {
        let flipped = {
            let mut snap = self.snapshot.write();
            notify::mark_all_read(&mut snap.notifications)
        };
        if !flipped.is_empty() {
            self.emit(SyncEvent::NotificationsRead { ids: flipped });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.api.mark_all_notifications_read().await {
                warn!(error = %e, "mark-all-as-read not acknowledged");
            }
        });
    }
}
