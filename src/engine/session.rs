//! Duel session records and lifecycle states.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::protocol;

/// Lifecycle of a session. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Stopped,
    Expired,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

/// Why a session ended; carried in the `SessionEnd` frame so clients can
/// distinguish a manual stop from the countdown running out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Stopped,
    Expired,
    Aborted,
}

impl EndReason {
    pub fn as_wire(self) -> &'static str {
        match self {
            EndReason::Stopped => protocol::REASON_STOPPED,
            EndReason::Expired => protocol::REASON_EXPIRED,
            EndReason::Aborted => protocol::REASON_ABORTED,
        }
    }

    pub fn terminal_state(self) -> SessionState {
        match self {
            EndReason::Stopped => SessionState::Stopped,
            EndReason::Expired => SessionState::Expired,
            EndReason::Aborted => SessionState::Aborted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_a: String,
    pub user_b: String,
    /// The invite this session came from. Provenance only — never used to
    /// reach back into invite state.
    pub invite_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub end_deadline: DateTime<Utc>,
    /// When the session reached its terminal state; drives tombstone reaping.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_a: &str, user_b: &str, invite_id: Uuid, duration: Duration) -> Self {
        let now = Utc::now();
        let chrono_duration =
            chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::seconds(600));
        Self {
            id: Uuid::new_v4(),
            user_a: user_a.to_string(),
            user_b: user_b.to_string(),
            invite_id,
            state: SessionState::Active,
            started_at: now,
            duration,
            end_deadline: now + chrono_duration,
            closed_at: None,
        }
    }

    pub fn is_participant(&self, user: &str) -> bool {
        self.user_a == user || self.user_b == user
    }

    /// The other participant, for per-recipient notification payloads.
    pub fn opponent_of(&self, user: &str) -> Option<&str> {
        if self.user_a == user {
            Some(&self.user_b)
        } else if self.user_b == user {
            Some(&self.user_a)
        } else {
            None
        }
    }
}
