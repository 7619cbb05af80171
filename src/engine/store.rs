//! Backing store for invite and session records.
//!
//! Single source of truth for entity state. Every transition out of a
//! live state goes through a conditional write executed under the table
//! mutex — the current state is re-read and compared before the write, so
//! racing events for the same entity serialize here and exactly one
//! terminal transition wins. Terminal records are kept as tombstones
//! until the maintenance sweep reaps them, so late or redelivered events
//! resolve as state mismatches (silently absorbed upstream) rather than
//! lookups of a missing entity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::invite::{Invite, InviteState};
use super::session::{Session, SessionState};

/// Outcome of a conditional transition that did not take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasError {
    /// No record under that id (never created, or tombstone already reaped).
    NotFound,
    /// The record exists but its state no longer matches the expected
    /// precondition: some other transition won the race.
    Mismatch,
}

#[derive(Default)]
struct InviteTable {
    records: HashMap<Uuid, Invite>,
    /// Ordered (from, to) pair → the single pending invite between them.
    pending_by_pair: HashMap<(String, String), Uuid>,
}

#[derive(Default)]
struct SessionTable {
    records: HashMap<Uuid, Session>,
    /// Participant → their single active session.
    active_by_user: HashMap<String, Uuid>,
}

pub struct Store {
    tombstone_ttl: chrono::Duration,
    invites: Mutex<InviteTable>,
    sessions: Mutex<SessionTable>,
}

impl Store {
    pub fn new(tombstone_ttl: Duration) -> Self {
        Self {
            tombstone_ttl: chrono::Duration::from_std(tombstone_ttl)
                .unwrap_or(chrono::Duration::seconds(60)),
            invites: Mutex::new(InviteTable::default()),
            sessions: Mutex::new(SessionTable::default()),
        }
    }

    // ── Invites ──

    /// Create a pending invite. If the same ordered pair already has one,
    /// it is atomically superseded (terminal) and returned so the caller
    /// can cancel its timer and notify.
    pub fn create_invite(
        &self,
        from_user: &str,
        to_user: &str,
        window: Duration,
    ) -> (Invite, Option<Invite>) {
        let window =
            chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(60));
        let invite = Invite::new(from_user, to_user, window);
        let pair = (from_user.to_string(), to_user.to_string());

        let mut table = self.invites.lock().unwrap();
        let superseded = match table.pending_by_pair.remove(&pair) {
            Some(old_id) => table.records.get_mut(&old_id).map(|old| {
                old.state = InviteState::Superseded;
                old.closed_at = Some(Utc::now());
                old.clone()
            }),
            None => None,
        };
        table.pending_by_pair.insert(pair, invite.id);
        table.records.insert(invite.id, invite.clone());
        (invite, superseded)
    }

    /// Snapshot read.
    pub fn get_invite(&self, id: Uuid) -> Option<Invite> {
        self.invites.lock().unwrap().records.get(&id).cloned()
    }

    /// Conditional transition: applied only if the invite is still in
    /// `expected`. Returns the post-transition snapshot on success.
    pub fn transition_invite(
        &self,
        id: Uuid,
        expected: InviteState,
        next: InviteState,
    ) -> Result<Invite, CasError> {
        let mut table = self.invites.lock().unwrap();
        let record = table.records.get_mut(&id).ok_or(CasError::NotFound)?;
        if record.state != expected {
            return Err(CasError::Mismatch);
        }
        record.state = next;
        if next.is_terminal() {
            record.closed_at = Some(Utc::now());
        }
        let snapshot = record.clone();
        if expected == InviteState::Pending {
            let pair = (snapshot.from_user.clone(), snapshot.to_user.clone());
            if table.pending_by_pair.get(&pair) == Some(&id) {
                table.pending_by_pair.remove(&pair);
            }
        }
        Ok(snapshot)
    }

    // ── Sessions ──

    /// Create an active session, atomically reserving both participants.
    /// Fails with the offending user if either already has an active
    /// session. Callers that later lose the invite race must release the
    /// reservation with [`Store::release_session`].
    pub fn reserve_session(
        &self,
        user_a: &str,
        user_b: &str,
        invite_id: Uuid,
        duration: Duration,
    ) -> Result<Session, String> {
        let mut table = self.sessions.lock().unwrap();
        for user in [user_a, user_b] {
            if table.active_by_user.contains_key(user) {
                return Err(user.to_string());
            }
        }
        let session = Session::new(user_a, user_b, invite_id, duration);
        table
            .active_by_user
            .insert(user_a.to_string(), session.id);
        table
            .active_by_user
            .insert(user_b.to_string(), session.id);
        table.records.insert(session.id, session.clone());
        Ok(session)
    }

    /// Drop a reserved session that was never announced. Rollback path
    /// for an accept that lost the invite race; leaves no tombstone.
    pub fn release_session(&self, id: Uuid) {
        let mut table = self.sessions.lock().unwrap();
        if let Some(session) = table.records.remove(&id) {
            table.active_by_user.remove(&session.user_a);
            table.active_by_user.remove(&session.user_b);
        }
    }

    /// Snapshot read.
    pub fn get_session(&self, id: Uuid) -> Option<Session> {
        self.sessions.lock().unwrap().records.get(&id).cloned()
    }

    /// The user's active session, if any.
    pub fn active_session_for(&self, user: &str) -> Option<Session> {
        let table = self.sessions.lock().unwrap();
        let id = table.active_by_user.get(user)?;
        table.records.get(id).cloned()
    }

    /// Conditional transition out of `Active`. Releases both participants'
    /// reservations on success.
    pub fn transition_session(
        &self,
        id: Uuid,
        expected: SessionState,
        next: SessionState,
    ) -> Result<Session, CasError> {
        let mut table = self.sessions.lock().unwrap();
        let record = table.records.get_mut(&id).ok_or(CasError::NotFound)?;
        if record.state != expected {
            return Err(CasError::Mismatch);
        }
        record.state = next;
        if next.is_terminal() {
            record.closed_at = Some(Utc::now());
        }
        let snapshot = record.clone();
        if expected == SessionState::Active && next.is_terminal() {
            for user in [&snapshot.user_a, &snapshot.user_b] {
                if table.active_by_user.get(user) == Some(&id) {
                    table.active_by_user.remove(user);
                }
            }
        }
        Ok(snapshot)
    }

    // ── Maintenance ──

    /// Reap terminal records older than the tombstone TTL.
    pub fn sweep_tombstones(&self, now: DateTime<Utc>) {
        let cutoff = now - self.tombstone_ttl;
        {
            let mut table = self.invites.lock().unwrap();
            table
                .records
                .retain(|_, r| r.closed_at.map_or(true, |t| t > cutoff));
        }
        {
            let mut table = self.sessions.lock().unwrap();
            table
                .records
                .retain(|_, r| r.closed_at.map_or(true, |t| t > cutoff));
        }
    }

    #[cfg(test)]
    pub fn invite_count(&self) -> usize {
        self.invites.lock().unwrap().records.len()
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);
    const DURATION: Duration = Duration::from_secs(600);

    fn make_store() -> Store {
        Store::new(Duration::from_secs(60))
    }

    #[test]
    fn test_create_and_get_invite() {
        let store = make_store();
        let (invite, superseded) = store.create_invite("alice", "bob", WINDOW);
        assert!(superseded.is_none());

        let snap = store.get_invite(invite.id).unwrap();
        assert_eq!(snap.state, InviteState::Pending);
        assert_eq!(snap.from_user, "alice");
        assert_eq!(snap.to_user, "bob");
    }

    #[test]
    fn test_second_invite_supersedes_first() {
        let store = make_store();
        let (first, _) = store.create_invite("alice", "bob", WINDOW);
        let (second, superseded) = store.create_invite("alice", "bob", WINDOW);

        let old = superseded.unwrap();
        assert_eq!(old.id, first.id);
        assert_eq!(old.state, InviteState::Superseded);
        assert_eq!(store.get_invite(first.id).unwrap().state, InviteState::Superseded);
        assert_eq!(store.get_invite(second.id).unwrap().state, InviteState::Pending);
    }

    #[test]
    fn test_reverse_pair_does_not_supersede() {
        let store = make_store();
        let (first, _) = store.create_invite("alice", "bob", WINDOW);
        let (_, superseded) = store.create_invite("bob", "alice", WINDOW);
        assert!(superseded.is_none());
        assert_eq!(store.get_invite(first.id).unwrap().state, InviteState::Pending);
    }

    #[test]
    fn test_invite_cas_first_wins() {
        let store = make_store();
        let (invite, _) = store.create_invite("alice", "bob", WINDOW);

        let accepted = store
            .transition_invite(invite.id, InviteState::Pending, InviteState::Accepted)
            .unwrap();
        assert_eq!(accepted.state, InviteState::Accepted);

        // The losing transition is a mismatch, not a double-transition.
        let err = store
            .transition_invite(invite.id, InviteState::Pending, InviteState::Expired)
            .unwrap_err();
        assert_eq!(err, CasError::Mismatch);
        assert_eq!(store.get_invite(invite.id).unwrap().state, InviteState::Accepted);
    }

    #[test]
    fn test_invite_cas_unknown_id() {
        let store = make_store();
        let err = store
            .transition_invite(Uuid::new_v4(), InviteState::Pending, InviteState::Expired)
            .unwrap_err();
        assert_eq!(err, CasError::NotFound);
    }

    #[test]
    fn test_terminal_invite_frees_pair_slot() {
        let store = make_store();
        let (first, _) = store.create_invite("alice", "bob", WINDOW);
        store
            .transition_invite(first.id, InviteState::Pending, InviteState::Rejected)
            .unwrap();

        // A new invite for the pair starts fresh, nothing to supersede.
        let (_, superseded) = store.create_invite("alice", "bob", WINDOW);
        assert!(superseded.is_none());
    }

    #[test]
    fn test_reserve_session_exclusivity() {
        let store = make_store();
        let session = store
            .reserve_session("alice", "bob", Uuid::new_v4(), DURATION)
            .unwrap();
        assert_eq!(session.state, SessionState::Active);

        let err = store
            .reserve_session("alice", "carol", Uuid::new_v4(), DURATION)
            .unwrap_err();
        assert_eq!(err, "alice");
        let err = store
            .reserve_session("carol", "bob", Uuid::new_v4(), DURATION)
            .unwrap_err();
        assert_eq!(err, "bob");
    }

    #[test]
    fn test_release_session_rolls_back_reservation() {
        let store = make_store();
        let session = store
            .reserve_session("alice", "bob", Uuid::new_v4(), DURATION)
            .unwrap();
        store.release_session(session.id);

        assert!(store.get_session(session.id).is_none());
        assert!(store
            .reserve_session("alice", "bob", Uuid::new_v4(), DURATION)
            .is_ok());
    }

    #[test]
    fn test_session_cas_first_wins() {
        let store = make_store();
        let session = store
            .reserve_session("alice", "bob", Uuid::new_v4(), DURATION)
            .unwrap();

        store
            .transition_session(session.id, SessionState::Active, SessionState::Stopped)
            .unwrap();
        let err = store
            .transition_session(session.id, SessionState::Active, SessionState::Expired)
            .unwrap_err();
        assert_eq!(err, CasError::Mismatch);
        assert_eq!(store.get_session(session.id).unwrap().state, SessionState::Stopped);
    }

    #[test]
    fn test_terminal_session_frees_participants() {
        let store = make_store();
        let session = store
            .reserve_session("alice", "bob", Uuid::new_v4(), DURATION)
            .unwrap();
        assert!(store.active_session_for("alice").is_some());

        store
            .transition_session(session.id, SessionState::Active, SessionState::Expired)
            .unwrap();
        assert!(store.active_session_for("alice").is_none());
        assert!(store
            .reserve_session("alice", "carol", Uuid::new_v4(), DURATION)
            .is_ok());
    }

    #[test]
    fn test_sweep_reaps_only_old_tombstones() {
        let store = Store::new(Duration::from_secs(0));
        let (invite, _) = store.create_invite("alice", "bob", WINDOW);
        let (pending, _) = store.create_invite("alice", "carol", WINDOW);
        store
            .transition_invite(invite.id, InviteState::Pending, InviteState::Rejected)
            .unwrap();

        store.sweep_tombstones(Utc::now() + chrono::Duration::seconds(1));
        assert!(store.get_invite(invite.id).is_none());
        // Live records are never reaped.
        assert!(store.get_invite(pending.id).is_some());
        assert_eq!(store.invite_count(), 1);
    }
}
