//! Event queue orchestrator.
//!
//! Producers on any thread push named events here; the scheduler thread swaps
//! the pending list out once per drain pass. The swap mechanics live in the
//! crate-private `mailbox` module so the completion bridge can reuse them.

mod core;
pub(crate) mod mailbox;

pub use self::core::{Event, EventQueue, Payload};
pub use mailbox::{DropReason, Enqueued};
