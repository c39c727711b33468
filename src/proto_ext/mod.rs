//! Extension traits and helpers for generated proto types.

mod id;
mod stream;

pub use id::{generate_event_id, EventIdExt, UserIdExt};
pub use stream::{bounded_receive, monitor_stream_health};
