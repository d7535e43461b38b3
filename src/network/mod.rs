//! Network subsystem for UDP voice relay

pub mod client;
pub mod server;
pub mod tone;
pub mod udp;

pub use client::{ClientHandle, TunnelClient};
pub use server::{RelayHandle, RelayServer};
pub use tone::ToneSource;
pub use udp::create_socket;
