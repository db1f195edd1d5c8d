//! Session routing, room registry and the tick scheduler

pub mod scheduler;
pub mod service;

pub use scheduler::{GameServer, ServerError};
pub use service::{DispatchEvent, Dispatcher, Outbox, RegistryStats};
