//! Per-session stale-event filtering.

use std::sync::Arc;

use crate::proto::event::Event;

/// Session-local predicate that may drop individual events from a batch
/// before they are sent to the client.
///
/// Detectors are stateful (e.g. tracking sequence numbers) and are never
/// shared across sessions.
pub trait StaleEventDetector: Send {
    fn should_drop(&mut self, event: &Event) -> bool;
}

/// Factory producing a fresh detector for each new session.
pub type StaleEventDetectorCtor = Arc<dyn Fn() -> Box<dyn StaleEventDetector> + Send + Sync>;
