//! Control surface for the front-end
//!
//! HTTP endpoints for counters, session listing and capability toggles, plus
//! a WebSocket pushing new-session notifications.

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer};
