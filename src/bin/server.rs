//! Relay Server Application
//!
//! Accepts listener registrations and relays voice frames to every live
//! listener over UDP.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_tunnel::{config::AppConfig, network::RelayServer, network::ToneSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Voice Tunnel Server");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    config.validate_server()?;

    if let Some(interface) = &config.server.capture_interface {
        tracing::info!(
            "Capture source selectors: interface {}, voice port {:?}",
            interface,
            config.server.voice_port
        );
    }

    let server = RelayServer::bind(
        config.server.bind_addr()?,
        &config.server.password,
        config.server.sweep_interval(),
    )?;
    let handle = server.spawn();

    let _tone = match &config.server.tone {
        Some(tone) => Some(ToneSource::new(tone)?.spawn(handle.voice_sender())),
        None => {
            tracing::info!("No test tone configured, waiting for a capture source");
            None
        }
    };

    let mut stats_interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats_interval.tick() => {
                let stats = handle.stats();
                tracing::info!(
                    "Stats: {} listeners, {} frames relayed, {} datagrams, {:.1} KB sent, {} send errors",
                    handle.registry().len(),
                    stats.frames_relayed,
                    stats.datagrams_sent,
                    stats.bytes_sent as f64 / 1024.0,
                    stats.send_errors
                );
            }
        }
    }

    handle.shutdown();
    Ok(())
}
