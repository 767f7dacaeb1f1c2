//! Per-User Event Bus
//!
//! Process-local publish/subscribe pushing reconciliation outcomes to live
//! client connections. Best-effort and not durable: events published while
//! nobody listens are dropped, and a dropped connection tears down only its
//! own subscription.

pub mod bus;
pub mod ws;

pub use bus::{EventBus, UserEvent};
pub use ws::ws_user_events;
