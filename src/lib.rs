//! Ridesync — client-side synchronization core for the ride system.
//!
//! Keeps a local view of rides and notifications consistent with the gateway
//! through polling and an optional push channel, and enforces the ride
//! lifecycle table client-side. Presentation layers embed the
//! [`sync::SyncCoordinator`], subscribe to its change feed, and issue
//! commands through it; everything else here exists in service of that.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod push;
pub mod session;
pub mod sync;
pub mod transport;

pub use config::{ReconnectBackoff, SyncConfig};
pub use error::SyncError;
pub use models::{
    Notification, NotificationId, NotificationKind, Ride, RideAction, RideId, RideStatus, Role,
    SyncSnapshot, UserId,
};
pub use push::{ConnectionManager, ConnectionState, PushEvent};
pub use session::{CredentialProvider, Session, StaticCredentials};
pub use sync::{Pollers, SyncCoordinator, SyncEvent};
pub use transport::rest::RestTransport;
pub use transport::{RideApi, StreamBatch, StreamSource};
