//! Invite records and lifecycle states.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle of an invite. Everything except `Pending` is terminal: at
/// most one transition out of `Pending` ever takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteState {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Superseded,
}

impl InviteState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, InviteState::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct Invite {
    pub id: Uuid,
    pub from_user: String,
    pub to_user: String,
    pub state: InviteState,
    pub created_at: DateTime<Utc>,
    pub response_deadline: DateTime<Utc>,
    /// When the invite reached its terminal state; drives tombstone reaping.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Invite {
    pub fn new(from_user: &str, to_user: &str, window: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            from_user: from_user.to_string(),
            to_user: to_user.to_string(),
            state: InviteState::Pending,
            created_at: now,
            response_deadline: now + window,
            closed_at: None,
        }
    }

    pub fn is_party(&self, user: &str) -> bool {
        self.from_user == user || self.to_user == user
    }
}
