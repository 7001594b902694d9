//! Notification log maintenance.
//!
//! Poll cycles and the push channel can both deliver the same notification,
//! and a poll that spans a reconnect can redeliver an entire window. The
//! merge here makes duplicate delivery harmless: keyed by id, ordered by
//! creation time descending, idempotent.

use std::collections::HashSet;

use crate::models::{Notification, NotificationId};

/// Result of merging an incoming batch into the local log.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The new log, descending by creation time (ties broken by id).
    pub log: Vec<Notification>,
    /// Ids that were genuinely new in this batch.
    pub added: Vec<NotificationId>,
}

/// Merge `incoming` into `existing`.
///
/// Entries whose id already exists are dropped entirely — in particular the
/// local `read` flag survives a redelivery that claims the entry is unread.
/// New entries are inserted in descending creation order, ties broken by id
/// descending, so the result is deterministic regardless of arrival order.
pub fn merge(existing: &[Notification], incoming: &[Notification]) -> MergeResult {
    let mut seen: HashSet<NotificationId> = existing.iter().map(|n| n.id).collect();
    let mut log: Vec<Notification> = existing.to_vec();
    let mut added = Vec::new();

    for notification in incoming {
        // `insert` also drops duplicates within the batch itself.
        if seen.insert(notification.id) {
            added.push(notification.id);
            log.push(notification.clone());
        }
    }

    log.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    MergeResult { log, added }
}

/// Flip every entry to read. Used by the bulk mark-all-read operation.
pub fn mark_all_read(log: &mut [Notification]) -> Vec<NotificationId> {
    let mut flipped = Vec::new();
    for notification in log.iter_mut() {
        if !notification.read {
            notification.read = true;
            flipped.push(notification.id);
        }
    }
    flipped
}
