//! Oracle Log Synchronization Module
//!
//! - `engine`: walks the chain from a persisted cursor, choosing backfill or live window sizes
//!   from the distance to the head, and dispatches each window's logs in chain order.
//! - `events`: the decoded oracle event set, the handler trait and the dispatcher.
//! - `reveal_trigger`: the handler that turns the agent's own events into reveals.
//! - `progress_tracker`: scan statistics and gap detection.

/// Cursor-driven log scanner
pub mod engine;
/// Event system for decoupled handling of oracle logs
pub mod events;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Reveal decisions driven by oracle events
pub mod reveal_trigger;

pub use engine::{CursorBootstrap, EventSyncEngine, SyncConfig, resolve_start_cursor};
pub use events::EventDispatcher;
pub use reveal_trigger::RevealTrigger;
