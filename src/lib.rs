//! # Voice Tunnel
//!
//! Relays voice audio tapped from a voice-chat application's traffic to a
//! set of registered UDP listeners, which decode, play and optionally record
//! every speaker independently.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              RELAY SERVER                                │
//! │  ┌──────────────────┐      ┌──────────────────────────────────────────┐  │
//! │  │ Capture source   │─────▶│ Relay Dispatcher (network::server)       │  │
//! │  │ (external / tone)│ mpsc │  pack VoiceFrames into batch datagrams   │  │
//! │  └──────────────────┘      └─────────────────────┬────────────────────┘  │
//! │                                                  │ snapshot              │
//! │  ┌──────────────────┐      ┌─────────────────────▼────────────────────┐  │
//! │  │ UDP receive loop │─────▶│ Client Registry (registry)               │  │
//! │  │ Ping / password  │      │  Mutex<Vec<RegisteredClient>>            │  │
//! │  └──────────────────┘      └─────────────────────▲────────────────────┘  │
//! │                                                  │ sweep every 2s        │
//! │                            ┌─────────────────────┴────────────────────┐  │
//! │                            │ Eviction timer                           │  │
//! │                            └──────────────────────────────────────────┘  │
//! └──────────────────────────────────────┬───────────────────────────────────┘
//!                                        │ UDP: [len u16][session u64][opus]...
//!                                        ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              LISTENER CLIENT                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐    │
//! │  │  UDP receive loop (network::client) + keepalive timer            │    │
//! │  └───────────────────────────────┬──────────────────────────────────┘    │
//! │                                  ▼ demux by session id                   │
//! │  ┌──────────────────────────────────────────────────────────────────┐    │
//! │  │  Session Manager (session)                                       │    │
//! │  │   Session 7         Session 9         Session N                  │    │
//! │  │  ┌──────────┐      ┌──────────┐      ┌──────────┐                │    │
//! │  │  │  Opus    │      │  Opus    │      │  Opus    │                │    │
//! │  │  │ Decoder  │      │ Decoder  │      │ Decoder  │                │    │
//! │  │  └────┬─────┘      └────┬─────┘      └────┬─────┘                │    │
//! │  │       ▼ SPSC ring       ▼                 ▼                      │    │
//! │  │  ┌──────────┐      ┌──────────┐      ┌──────────┐                │    │
//! │  │  │ Playback │      │ Playback │      │ Playback │ ──▶ <id>.pcm   │    │
//! │  │  │ callback │      │ callback │      │ callback │                │    │
//! │  │  └──────────┘      └──────────┘      └──────────┘                │    │
//! │  └──────────────────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of every voice stream
    pub const SAMPLE_RATE: u32 = 48000;

    /// Voice streams are mono
    pub const CHANNELS: u16 = 1;

    /// Samples per codec frame (20ms at 48kHz)
    pub const FRAME_SIZE: usize = 960;

    /// Bytes per decoded PCM sample (i16)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Keepalive datagram payload
    pub const KEEPALIVE: &[u8] = b"Ping";

    /// Keepalive period of the client, also the server eviction threshold
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 2;

    /// Default UDP port of the relay server
    pub const DEFAULT_SERVER_PORT: u16 = 9987;

    /// Default HTTP port of the client control surface
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Maximum datagram size produced by the relay (MTU - IP/UDP headers)
    pub const MAX_DATAGRAM_SIZE: usize = 1472;

    /// Largest datagram accepted on receive
    pub const MAX_RECV_SIZE: usize = 65536;

    /// Per-session PCM ring capacity, in samples (~500ms)
    pub const RING_BUFFER_CAPACITY: usize = FRAME_SIZE * 25;

    /// Bitrate used by the test-tone encoder
    pub const DEFAULT_BITRATE: u32 = 32_000;
}
