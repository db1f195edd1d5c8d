//! Room Sync Server - authoritative room-based state synchronization
//!
//! Clients connect over WebSocket, are packed first-fit into bounded rooms,
//! and submit movement inputs that a fixed-rate tick applies. Each room
//! broadcasts consolidated state at its own snapshot rate.

pub mod app;
pub mod config;
pub mod dispatch;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
