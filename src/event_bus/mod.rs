//! Process-local notification bus (§6 "Asynchronous notifications").
//!
//! The excluded WebSocket adapter is the intended consumer — it subscribes
//! once and forwards every [`AppEvent`] to its own transport. Nothing in
//! this crate depends on how (or whether) that forwarding happens.

pub mod tokio_bus;
pub mod traits;

pub use tokio_bus::TokioBroadcastBus;
pub use traits::{AppEvent, EventBus, EventFilter, EventType};
