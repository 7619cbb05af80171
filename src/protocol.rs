use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A parsed protocol message: `CommandName JSON\n`
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub command: String,
    pub data: serde_json::Value,
}

impl WireMessage {
    pub fn new(command: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            data,
        }
    }

    /// Build a message from a command name and a serializable payload.
    pub fn from_payload(command: &str, payload: &impl Serialize) -> Self {
        Self {
            command: command.to_string(),
            data: serde_json::to_value(payload).unwrap_or(serde_json::json!({})),
        }
    }

    /// Serialize to wire format: `CommandName JSON\n`
    pub fn to_wire(&self) -> String {
        format!("{} {}\n", self.command, self.data)
    }

    /// Parse from a single line (without trailing newline).
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(space_idx) = line.find(' ') {
            let command = line[..space_idx].to_string();
            let json_str = &line[space_idx + 1..];
            let data = serde_json::from_str(json_str)
                .unwrap_or(serde_json::Value::String(json_str.to_string()));
            Some(WireMessage { command, data })
        } else {
            Some(WireMessage {
                command: line.to_string(),
                data: serde_json::json!({}),
            })
        }
    }
}

// ── Client → Server commands ──

/// First command on every connection; binds the handle to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HelloCommand {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InviteCommand {
    pub to_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InviteResponseCommand {
    #[serde(rename = "InviteID")]
    pub invite_id: Uuid,
    pub accept: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopDuelCommand {
    #[serde(rename = "SessionID")]
    pub session_id: Uuid,
}

// ── Server → Client frames ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WelcomeData {
    pub server: String,
    pub version: String,
}

/// Pushed to the invitee when an invite is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvitedData {
    #[serde(rename = "InviteID")]
    pub invite_id: Uuid,
    pub from_user: String,
    pub expires_at: DateTime<Utc>,
}

/// Acknowledgment to the initiator, carrying the invite id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InviteSentData {
    #[serde(rename = "InviteID")]
    pub invite_id: Uuid,
    pub to_user: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InviteOutcomeData {
    #[serde(rename = "InviteID")]
    pub invite_id: Uuid,
    pub outcome: String,
}

/// Sent to both participants when a session starts. `StartedAt` is an
/// absolute epoch so the two local countdowns agree regardless of
/// delivery latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionStartData {
    #[serde(rename = "SessionID")]
    pub session_id: Uuid,
    pub opponent: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionEndData {
    #[serde(rename = "SessionID")]
    pub session_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserListData {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

// ── Command names ──

pub const CMD_HELLO: &str = "Hello";
pub const CMD_INVITE: &str = "Invite";
pub const CMD_INVITE_RESPONSE: &str = "InviteResponse";
pub const CMD_STOP_DUEL: &str = "StopDuel";
pub const CMD_LIST_USERS: &str = "ListUsers";
pub const CMD_PING: &str = "Ping";

pub const MSG_WELCOME: &str = "Welcome";
pub const MSG_INVITED: &str = "Invited";
pub const MSG_INVITE_SENT: &str = "InviteSent";
pub const MSG_INVITE_OUTCOME: &str = "InviteOutcome";
pub const MSG_SESSION_START: &str = "SessionStart";
pub const MSG_SESSION_END: &str = "SessionEnd";
pub const MSG_USER_LIST: &str = "UserList";
pub const MSG_ERROR: &str = "Error";

/// Invite outcome strings on the wire.
pub const OUTCOME_REJECTED: &str = "rejected";
pub const OUTCOME_EXPIRED: &str = "expired";
pub const OUTCOME_SUPERSEDED: &str = "superseded";

/// Session end reason strings on the wire.
pub const REASON_STOPPED: &str = "stopped";
pub const REASON_EXPIRED: &str = "expired";
pub const REASON_ABORTED: &str = "aborted";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_parsing() {
        let msg = WireMessage::from_line(r#"Invite {"ToUser":"bob"}"#).unwrap();
        assert_eq!(msg.command, "Invite");
        let data: InviteCommand = serde_json::from_value(msg.data).unwrap();
        assert_eq!(data.to_user, "bob");
    }

    #[test]
    fn test_message_no_data() {
        let msg = WireMessage::from_line("Ping").unwrap();
        assert_eq!(msg.command, "Ping");
        assert_eq!(msg.data, serde_json::json!({}));
    }

    #[test]
    fn test_empty_line() {
        assert!(WireMessage::from_line("").is_none());
        assert!(WireMessage::from_line("   ").is_none());
    }

    #[test]
    fn test_wire_format() {
        let msg = WireMessage::new("Ping", serde_json::json!({}));
        assert_eq!(msg.to_wire(), "Ping {}\n");
    }

    #[test]
    fn test_invite_response_serialization() {
        let id = Uuid::new_v4();
        let cmd = InviteResponseCommand {
            invite_id: id,
            accept: true,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["InviteID"], serde_json::json!(id));
        assert_eq!(json["Accept"], true);
    }

    #[test]
    fn test_session_start_round_trip() {
        let data = SessionStartData {
            session_id: Uuid::new_v4(),
            opponent: "bob".into(),
            started_at: Utc::now(),
            duration_secs: 600,
        };
        let msg = WireMessage::from_payload(MSG_SESSION_START, &data);
        let parsed = WireMessage::from_line(msg.to_wire().trim()).unwrap();
        assert_eq!(parsed.command, MSG_SESSION_START);
        let back: SessionStartData = serde_json::from_value(parsed.data).unwrap();
        assert_eq!(back.session_id, data.session_id);
        assert_eq!(back.duration_secs, 600);
    }
}
