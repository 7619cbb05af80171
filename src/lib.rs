//! Real-time duel coordination: presence tracking, invite negotiation
//! with a bounded response window, and timed sessions either party may
//! stop early.
//!
//! The interesting part is the engine: racing user actions and deadline
//! fires against the same invite or session, with exactly one terminal
//! outcome per entity however often events are duplicated or redelivered.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
