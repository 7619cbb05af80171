//! Connection registry: which users are online, on which handles.
//!
//! One user may own several concurrent handles (multi-device). Every
//! mutation refreshes the record's expiry so that the maintenance sweep
//! can reap handles whose disconnect was never observed.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::WireMessage;

/// Outbound channel capacity per handle. A client that falls this far
/// behind starts losing pushes rather than stalling the engine.
pub const OUTBOUND_QUEUE: usize = 64;

pub type HandleId = Uuid;
pub type OutboundSender = mpsc::Sender<WireMessage>;

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub user_id: String,
    pub sender: OutboundSender,
    pub established_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    handles: HashMap<HandleId, ConnectionRecord>,
    by_user: HashMap<String, HashSet<HandleId>>,
}

/// Concurrent-safe handle bookkeeping. No business logic lives here.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    ttl: Duration,
}

impl Registry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            ttl,
        }
    }

    fn fresh_expiry(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(300))
    }

    /// Register a handle for a user. Re-registering the same handle id
    /// refreshes the record (last write wins).
    pub fn register(&self, user_id: &str, handle_id: HandleId, sender: OutboundSender) {
        let now = Utc::now();
        let record = ConnectionRecord {
            user_id: user_id.to_string(),
            sender,
            established_at: now,
            expires_at: self.fresh_expiry(),
        };
        let mut inner = self.inner.write().unwrap();
        if let Some(old) = inner.handles.insert(handle_id, record) {
            // Handle re-bound to a different user: drop the stale index entry.
            if old.user_id != user_id {
                if let Some(set) = inner.by_user.get_mut(&old.user_id) {
                    set.remove(&handle_id);
                    if set.is_empty() {
                        inner.by_user.remove(&old.user_id);
                    }
                }
            }
        }
        inner
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(handle_id);
    }

    /// Remove a handle. Returns the owning user and whether that was the
    /// user's last live handle. Duplicate unregister is a no-op.
    pub fn unregister(&self, handle_id: HandleId) -> Option<(String, bool)> {
        let mut inner = self.inner.write().unwrap();
        let record = inner.handles.remove(&handle_id)?;
        let user_id = record.user_id;
        let mut last = false;
        if let Some(set) = inner.by_user.get_mut(&user_id) {
            set.remove(&handle_id);
            if set.is_empty() {
                inner.by_user.remove(&user_id);
                last = true;
            }
        }
        Some((user_id, last))
    }

    /// Refresh a handle's expiry. No-op for unknown handles.
    pub fn touch(&self, handle_id: HandleId) {
        let expires_at = self.fresh_expiry();
        let mut inner = self.inner.write().unwrap();
        if let Some(record) = inner.handles.get_mut(&handle_id) {
            record.expires_at = expires_at;
        }
    }

    /// All live outbound senders for a user. Empty if none — never an error.
    pub fn handles_for(&self, user_id: &str) -> Vec<OutboundSender> {
        let inner = self.inner.read().unwrap();
        inner
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.handles.get(id))
            .map(|r| r.sender.clone())
            .collect()
    }

    /// Whether the user has at least one live handle.
    pub fn is_online(&self, user_id: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner.by_user.get(user_id).is_some_and(|s| !s.is_empty())
    }

    /// Users with at least one unexpired handle, for the presence listing.
    pub fn list_active_users(&self) -> Vec<String> {
        let now = Utc::now();
        let inner = self.inner.read().unwrap();
        let mut users: Vec<String> = inner
            .by_user
            .iter()
            .filter(|(_, handles)| {
                handles
                    .iter()
                    .filter_map(|id| inner.handles.get(id))
                    .any(|r| r.expires_at > now)
            })
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Reap handles whose expiry passed without an observed unregister.
    /// Returns the reaped handle ids so the caller can treat each as a
    /// disconnect.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<HandleId> {
        let inner = self.inner.read().unwrap();
        let stale: Vec<HandleId> = inner
            .handles
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        drop(inner);
        stale
    }

    pub fn handle_count(&self) -> usize {
        self.inner.read().unwrap().handles.len()
    }
}
