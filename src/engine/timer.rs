//! Deadline scheduling: one sleep task per entity.
//!
//! Cancellation is best-effort. A cancel racing an in-flight fire is
//! expected and harmless — the fire re-enters the engine and dies on the
//! state guard. Fire delivery is at-least-once from the engine's point of
//! view; nothing here deduplicates.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

/// What a deadline event refers to; routing happens at the ingestion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Invite,
    Session,
}

/// Cheap to clone; clones share the task table.
#[derive(Clone, Default)]
pub struct Timers {
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a one-shot deadline for an entity. Scheduling again for
    /// the same id replaces (and aborts) the previous task.
    pub fn schedule(
        &self,
        entity_id: Uuid,
        fire_in: Duration,
        fire: impl Future<Output = ()> + Send + 'static,
    ) {
        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(fire_in).await;
            tasks.lock().unwrap().remove(&entity_id);
            fire.await;
        });
        if let Some(old) = self.tasks.lock().unwrap().insert(entity_id, handle) {
            old.abort();
        }
    }

    /// Best-effort cancel. Failure to cancel is never an error: the fire
    /// will be absorbed by the owning state machine's guard.
    pub fn cancel(&self, entity_id: Uuid) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(&entity_id) {
            handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}
