//! Listener Client Application
//!
//! Registers with a relay server, then plays and records every voice
//! session it receives.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_tunnel::{
    audio::{
        device::{get_default_output_device, get_output_device},
        list_output_devices, CpalOutputFactory,
    },
    config::AppConfig,
    network::TunnelClient,
    session::{SessionDefaults, SessionEvent, SessionManager},
    ui::WebServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Voice Tunnel Client");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    config.validate_client()?;

    // List available output devices
    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Id: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    // Without an output device no session could ever play or record
    match &config.client.output_device {
        Some(id) => get_output_device(id)?,
        None => get_default_output_device()?,
    };

    std::fs::create_dir_all(&config.client.save_dir)?;

    let sessions = Arc::new(
        SessionManager::new(
            Arc::new(CpalOutputFactory::new(config.client.output_device.clone())),
            config.client.save_dir.clone(),
        )
        .with_defaults(SessionDefaults {
            listen: config.client.listen_all,
            save: config.client.save_all,
        }),
    );
    let mut events = sessions.subscribe();

    let client = TunnelClient::bind(
        config.client.server_addr()?,
        &config.client.password,
        config.client.keepalive_interval(),
        sessions.clone(),
    )?;
    let handle = client.start().await?;

    let web = config
        .ui
        .enabled
        .then(|| WebServer::new(config.ui.clone(), sessions.clone()).start_background());

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                if let Ok(SessionEvent::NewSession { session_id }) = event {
                    println!("New voice session: {}", session_id);
                }
            }
            _ = stats_interval.tick() => {
                let stats = sessions.stats();
                tracing::info!(
                    "Stats: {} sessions, {} frames decoded, {:.1} KB decoded, {} decode errors",
                    stats.sessions,
                    stats.decoded_frames,
                    stats.decoded_bytes as f64 / 1024.0,
                    stats.decode_errors
                );
            }
        }
    }

    if let Some(web) = web {
        web.abort();
    }
    handle.shutdown();
    // Closes every playback stream and recording
    drop(sessions);
    Ok(())
}
