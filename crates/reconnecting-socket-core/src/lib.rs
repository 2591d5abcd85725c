//! Core infrastructure for reconnecting-socket.
//!
//! This crate provides the pieces shared by every socket instance:
//! - Event system for observability (listeners that can be added and removed)
//! - The process-wide debug switch

pub mod debug;
pub mod events;

pub use debug::{debug_all, debug_enabled, set_debug_all};
pub use events::{ConnectionEvent, EventListener, EventListeners, FnListener, ListenerId};
