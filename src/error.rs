//! Engine error taxonomy.
//!
//! Only errors that are reported back to the originating actor live here.
//! Duplicate or late events against entities that already reached a
//! terminal state are absorbed silently inside the engine and never
//! surface as errors.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown invite, session, or user referenced by an inbound event.
    #[error("not found: {0}")]
    NotFound(String),
    /// The acting user is not a legitimate party to the referenced entity.
    #[error("user '{user}' is not a party to {entity}")]
    NotAuthorized { user: String, entity: Uuid },
    /// A participant already has an active session.
    #[error("user '{0}' already has an active session")]
    AlreadyEngaged(String),
    /// Malformed inbound command (missing or invalid payload fields).
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl EngineError {
    /// Wire error code sent back in an `Error` frame.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::NotAuthorized { .. } => "not_authorized",
            EngineError::AlreadyEngaged(_) => "already_engaged",
            EngineError::BadRequest(_) => "bad_request",
        }
    }
}
