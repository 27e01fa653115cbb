//! Handler registry orchestrator.
//!
//! Subscribers are stored per event name in insertion order. Dispatch always
//! works from a snapshot so handlers can add or remove subscriptions while an
//! event is being delivered.

mod core;
mod handler;

pub(crate) use self::core::validate_event_name;
pub use self::core::{
    DEFAULT_HANDLER_TABLE_CAPACITY, HandlerRegistry, Subscription, SubscriptionId,
};
pub use handler::{CoroutineHandler, EventHandler, FnHandler, coroutine_handler, handler_fn};
