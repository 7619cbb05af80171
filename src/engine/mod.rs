//! The duel coordination engine.
//!
//! All external events — user commands, connection lifecycle, deadline
//! fires — enter through [`Engine::handle`] and are routed to the invite
//! or session state machine by correlation id. Transitions are guarded
//! compare-and-set writes in the store: the first transition out of a
//! live state wins and every other event against that entity is absorbed
//! silently. That single rule is what makes at-least-once delivery of
//! user actions and timer fires safe, so nothing here deduplicates.

pub mod invite;
pub mod session;
pub mod store;
pub mod timer;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::protocol::{
    InviteOutcomeData, InviteSentData, InvitedData, SessionEndData, SessionStartData,
    MSG_INVITED, MSG_INVITE_OUTCOME, MSG_INVITE_SENT, MSG_SESSION_END, MSG_SESSION_START,
    OUTCOME_EXPIRED, OUTCOME_REJECTED, OUTCOME_SUPERSEDED,
};
use crate::registry::{HandleId, OutboundSender, Registry};

use invite::InviteState;
use session::{EndReason, SessionState};
use store::{CasError, Store};
use timer::{EntityKind, Timers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Inbound events, from any source: client connections, timer tasks, the
/// maintenance sweep.
#[derive(Debug)]
pub enum Event {
    Connect {
        user_id: String,
        handle_id: HandleId,
        sender: OutboundSender,
    },
    Disconnect {
        handle_id: HandleId,
    },
    InviteRequest {
        from_user: String,
        to_user: String,
    },
    InviteResponse {
        invite_id: Uuid,
        responding_user: String,
        decision: Decision,
    },
    StopRequest {
        session_id: Uuid,
        requesting_user: String,
    },
    DeadlineFired {
        entity_id: Uuid,
        kind: EntityKind,
    },
}

/// Cheap to clone; clones share the store, registry, and timer table.
/// Timer tasks hold their own clone to re-enter [`Engine::handle`].
#[derive(Clone)]
pub struct Engine {
    config: Config,
    store: Arc<Store>,
    timers: Timers,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
}

impl Engine {
    pub fn new(config: Config, registry: Arc<Registry>) -> Self {
        Self {
            store: Arc::new(Store::new(config.tombstone_ttl)),
            timers: Timers::new(),
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }

    /// Single ingestion point. Errors go back to the originating caller
    /// only; duplicate or late events resolve to `Ok(())`.
    pub fn handle(&self, event: Event) -> Result<(), EngineError> {
        match event {
            Event::Connect {
                user_id,
                handle_id,
                sender,
            } => {
                self.registry.register(&user_id, handle_id, sender);
                tracing::info!("{} connected on {}", user_id, handle_id);
                Ok(())
            }
            Event::Disconnect { handle_id } => self.on_disconnect(handle_id),
            Event::InviteRequest { from_user, to_user } => {
                self.on_invite_request(&from_user, &to_user)
            }
            Event::InviteResponse {
                invite_id,
                responding_user,
                decision,
            } => self.on_invite_response(invite_id, &responding_user, decision),
            Event::StopRequest {
                session_id,
                requesting_user,
            } => self.on_stop_request(session_id, &requesting_user),
            Event::DeadlineFired { entity_id, kind } => self.on_deadline(entity_id, kind),
        }
    }

    /// Maintenance pass: reap stale connections (feeding each through the
    /// normal disconnect path) and drop old terminal tombstones.
    pub fn sweep(&self, now: DateTime<Utc>) {
        for handle_id in self.registry.sweep(now) {
            tracing::info!("Reaping stale connection {}", handle_id);
            let _ = self.handle(Event::Disconnect { handle_id });
        }
        self.store.sweep_tombstones(now);
    }

    // ── Connections ──

    fn on_disconnect(&self, handle_id: HandleId) -> Result<(), EngineError> {
        let Some((user_id, last_handle)) = self.registry.unregister(handle_id) else {
            // Duplicate disconnect, or already reaped by the sweep.
            return Ok(());
        };
        tracing::info!("{} disconnected from {}", user_id, handle_id);

        if last_handle && self.config.abort_on_disconnect {
            if let Some(session) = self.store.active_session_for(&user_id) {
                tracing::info!(
                    "Aborting session {} after {} fully disconnected",
                    session.id,
                    user_id
                );
                self.end_session(session.id, EndReason::Aborted);
            }
        }
        Ok(())
    }

    // ── Invites ──

    fn on_invite_request(&self, from_user: &str, to_user: &str) -> Result<(), EngineError> {
        if from_user == to_user {
            return Err(EngineError::BadRequest("cannot invite yourself".into()));
        }
        if !self.registry.is_online(to_user) {
            return Err(EngineError::NotFound(format!("user '{}' is not online", to_user)));
        }

        let (invite, superseded) =
            self.store
                .create_invite(from_user, to_user, self.config.invite_window);

        if let Some(old) = superseded {
            self.timers.cancel(old.id);
            self.dispatcher.send_to_user(
                from_user,
                MSG_INVITE_OUTCOME,
                &InviteOutcomeData {
                    invite_id: old.id,
                    outcome: OUTCOME_SUPERSEDED.to_string(),
                },
            );
        }

        self.schedule_deadline(invite.id, EntityKind::Invite, self.config.invite_window);
        self.dispatcher.send_to_user(
            to_user,
            MSG_INVITED,
            &InvitedData {
                invite_id: invite.id,
                from_user: from_user.to_string(),
                expires_at: invite.response_deadline,
            },
        );
        self.dispatcher.send_to_user(
            from_user,
            MSG_INVITE_SENT,
            &InviteSentData {
                invite_id: invite.id,
                to_user: to_user.to_string(),
                expires_at: invite.response_deadline,
            },
        );
        tracing::info!("Invite {} from {} to {}", invite.id, from_user, to_user);
        Ok(())
    }

    fn on_invite_response(
        &self,
        invite_id: Uuid,
        responding_user: &str,
        decision: Decision,
    ) -> Result<(), EngineError> {
        let invite = self
            .store
            .get_invite(invite_id)
            .ok_or_else(|| EngineError::NotFound(format!("invite {}", invite_id)))?;

        if invite.to_user != responding_user {
            return Err(EngineError::NotAuthorized {
                user: responding_user.to_string(),
                entity: invite_id,
            });
        }
        if invite.state.is_terminal() {
            tracing::debug!("Response to settled invite {} ignored", invite_id);
            return Ok(());
        }

        match decision {
            Decision::Reject => {
                match self
                    .store
                    .transition_invite(invite_id, InviteState::Pending, InviteState::Rejected)
                {
                    Ok(invite) => {
                        self.timers.cancel(invite_id);
                        let payload = InviteOutcomeData {
                            invite_id,
                            outcome: OUTCOME_REJECTED.to_string(),
                        };
                        self.dispatcher
                            .send_to_user(&invite.from_user, MSG_INVITE_OUTCOME, &payload);
                        // Echoed to the invitee as UI confirmation.
                        self.dispatcher
                            .send_to_user(&invite.to_user, MSG_INVITE_OUTCOME, &payload);
                        tracing::info!("Invite {} rejected by {}", invite_id, responding_user);
                    }
                    Err(_) => {
                        tracing::debug!("Reject lost the race on invite {}", invite_id);
                    }
                }
                Ok(())
            }
            Decision::Accept => {
                // Reserve the session before settling the invite, so the
                // exclusivity check and the invite transition can't
                // interleave with another accept. Losing the invite race
                // below releases the never-announced reservation.
                let session = self
                    .store
                    .reserve_session(
                        &invite.from_user,
                        &invite.to_user,
                        invite_id,
                        self.config.duel_duration,
                    )
                    .map_err(EngineError::AlreadyEngaged)?;

                match self
                    .store
                    .transition_invite(invite_id, InviteState::Pending, InviteState::Accepted)
                {
                    Ok(_) => {
                        self.timers.cancel(invite_id);
                        self.schedule_deadline(
                            session.id,
                            EntityKind::Session,
                            self.config.duel_duration,
                        );
                        for user in [&session.user_a, &session.user_b] {
                            let opponent =
                                session.opponent_of(user).unwrap_or_default().to_string();
                            self.dispatcher.send_to_user(
                                user,
                                MSG_SESSION_START,
                                &SessionStartData {
                                    session_id: session.id,
                                    opponent,
                                    started_at: session.started_at,
                                    duration_secs: session.duration.as_secs(),
                                },
                            );
                        }
                        tracing::info!(
                            "Session {} started: {} vs {}",
                            session.id,
                            session.user_a,
                            session.user_b
                        );
                        Ok(())
                    }
                    Err(_) => {
                        self.store.release_session(session.id);
                        tracing::debug!("Accept lost the race on invite {}", invite_id);
                        Ok(())
                    }
                }
            }
        }
    }

    // ── Sessions ──

    fn on_stop_request(&self, session_id: Uuid, requesting_user: &str) -> Result<(), EngineError> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {}", session_id)))?;

        if !session.is_participant(requesting_user) {
            return Err(EngineError::NotAuthorized {
                user: requesting_user.to_string(),
                entity: session_id,
            });
        }
        self.end_session(session_id, EndReason::Stopped);
        Ok(())
    }

    /// Guarded terminal transition plus notifications. Safe against
    /// duplicates and against racing the deadline fire: whichever
    /// transition loses is dropped here without notifying anyone.
    fn end_session(&self, session_id: Uuid, reason: EndReason) {
        match self
            .store
            .transition_session(session_id, SessionState::Active, reason.terminal_state())
        {
            Ok(session) => {
                self.timers.cancel(session_id);
                self.dispatcher.send_to_pair(
                    &session.user_a,
                    &session.user_b,
                    MSG_SESSION_END,
                    &SessionEndData {
                        session_id,
                        reason: reason.as_wire().to_string(),
                    },
                );
                tracing::info!("Session {} ended: {}", session_id, reason.as_wire());
            }
            Err(CasError::NotFound) => {
                tracing::debug!("End event for unknown session {}", session_id);
            }
            Err(CasError::Mismatch) => {
                tracing::debug!("Session {} already settled, ignoring {:?}", session_id, reason);
            }
        }
    }

    // ── Deadlines ──

    fn on_deadline(&self, entity_id: Uuid, kind: EntityKind) -> Result<(), EngineError> {
        match kind {
            EntityKind::Invite => {
                match self.store.transition_invite(
                    entity_id,
                    InviteState::Pending,
                    InviteState::Expired,
                ) {
                    Ok(invite) => {
                        self.dispatcher.send_to_user(
                            &invite.from_user,
                            MSG_INVITE_OUTCOME,
                            &InviteOutcomeData {
                                invite_id: entity_id,
                                outcome: OUTCOME_EXPIRED.to_string(),
                            },
                        );
                        tracing::info!("Invite {} expired", entity_id);
                    }
                    Err(CasError::NotFound) => {
                        tracing::debug!("Deadline fire for unknown invite {}", entity_id);
                    }
                    Err(CasError::Mismatch) => {
                        tracing::debug!("Late deadline fire for invite {}", entity_id);
                    }
                }
            }
            EntityKind::Session => self.end_session(entity_id, EndReason::Expired),
        }
        Ok(())
    }

    fn schedule_deadline(&self, entity_id: Uuid, kind: EntityKind, fire_in: Duration) {
        let engine = self.clone();
        self.timers.schedule(entity_id, fire_in, async move {
            let _ = engine.handle(Event::DeadlineFired { entity_id, kind });
        });
    }
}
