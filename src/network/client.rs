//! Listener client
//!
//! Registers with the relay server once, then keeps the registration alive
//! with a periodic keepalive while feeding every received batch into the
//! session manager. The server never acknowledges registration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::validate_password;
use crate::constants::{KEEPALIVE, MAX_RECV_SIZE};
use crate::error::{Error, NetworkError};
use crate::network::udp::{create_socket, ephemeral_addr_for};
use crate::session::SessionManager;

pub struct TunnelClient {
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    password: String,
    keepalive_interval: Duration,
    sessions: Arc<SessionManager>,
}

impl TunnelClient {
    /// Bind a local socket on an ephemeral port
    pub fn bind(
        server: SocketAddr,
        password: &str,
        keepalive_interval: Duration,
        sessions: Arc<SessionManager>,
    ) -> Result<Self, Error> {
        validate_password(password)?;
        let socket = create_socket(ephemeral_addr_for(server))?;

        Ok(Self {
            socket: Arc::new(socket),
            server,
            password: password.to_string(),
            keepalive_interval,
            sessions,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Send the registration datagram
    pub async fn register(&self) -> Result<(), Error> {
        let sent = self
            .socket
            .send_to(self.password.as_bytes(), self.server)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        if sent != self.password.len() {
            return Err(NetworkError::SendFailed(format!(
                "registration truncated: {} of {} bytes",
                sent,
                self.password.len()
            ))
            .into());
        }

        tracing::info!(
            "Registered with {} from {}",
            self.server,
            self.socket.local_addr()?
        );
        Ok(())
    }

    /// Register, then start the keepalive timer and the receive loop
    pub async fn start(self) -> Result<ClientHandle, Error> {
        self.register().await?;

        let keepalive = tokio::spawn(keepalive_loop(
            self.socket.clone(),
            self.server,
            self.keepalive_interval,
        ));
        let receive = tokio::spawn(receive_loop(self.socket.clone(), self.sessions.clone()));

        Ok(ClientHandle {
            sessions: self.sessions,
            tasks: vec![keepalive, receive],
        })
    }
}

/// Running listener client
pub struct ClientHandle {
    sessions: Arc<SessionManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientHandle {
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Stop receiving and sending keepalives
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("Client stopped");
    }
}

async fn keepalive_loop(socket: Arc<UdpSocket>, server: SocketAddr, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Registration just refreshed us
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(e) = socket.send_to(KEEPALIVE, server).await {
            tracing::warn!("Keepalive to {} failed: {}", server, e);
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, sessions: Arc<SessionManager>) {
    let mut buf = vec![0u8; MAX_RECV_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _from)) => {
                sessions.handle_datagram(&buf[..len]);
            }
            Err(e) => {
                tracing::debug!("Client receive error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::{OutputFactory, OutputHandle, SessionOutput};
    use crate::error::AudioError;
    use crate::protocol::VoiceFrame;
    use crate::session::SessionEvent;
    use bytes::BytesMut;
    use tokio::time::timeout;

    struct NullHandle;

    impl OutputHandle for NullHandle {
        fn is_running(&self) -> bool {
            true
        }
    }

    struct NullOutputFactory;

    impl OutputFactory for NullOutputFactory {
        fn open(&self, _output: SessionOutput) -> Result<Box<dyn OutputHandle>, AudioError> {
            Ok(Box::new(NullHandle))
        }
    }

    fn sessions() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(Arc::new(NullOutputFactory), std::env::temp_dir()))
    }

    #[tokio::test]
    async fn test_registers_then_sends_keepalives() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = TunnelClient::bind(
            server_addr,
            "secret",
            Duration::from_millis(50),
            sessions(),
        )
        .unwrap();
        let handle = client.start().await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(2), server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"secret");

        let (len, _) = timeout(Duration::from_secs(2), server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], KEEPALIVE);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_received_batches_create_sessions() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = TunnelClient::bind(server_addr, "secret", Duration::from_secs(60), sessions())
            .unwrap();
        let client_addr = client.local_addr().unwrap();
        let handle = client.start().await.unwrap();
        let mut events = handle.sessions().subscribe();

        let mut datagram = BytesMut::new();
        VoiceFrame::new(7, vec![0xF8, 0xFF, 0xFE]).write_to(&mut datagram).unwrap();
        VoiceFrame::new(9, vec![0xF8, 0xFF, 0xFE]).write_to(&mut datagram).unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], client_addr.port()));
        server.send_to(&datagram, target).await.unwrap();

        let first = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(first, SessionEvent::NewSession { session_id: 7 });
        assert_eq!(second, SessionEvent::NewSession { session_id: 9 });

        // Both muted, nothing decoded
        assert_eq!(handle.sessions().stats().decoded_frames, 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_relay_to_client_end_to_end() {
        use crate::config::ToneConfig;
        use crate::network::{RelayServer, ToneSource};
        use crate::session::SessionDefaults;

        let server = RelayServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            "secret",
            Duration::from_secs(60),
        )
        .unwrap();
        let server_addr = server.local_addr().unwrap();
        let relay = server.spawn();

        let sessions = Arc::new(
            SessionManager::new(Arc::new(NullOutputFactory), std::env::temp_dir()).with_defaults(
                SessionDefaults {
                    listen: true,
                    save: false,
                },
            ),
        );
        let client = TunnelClient::bind(server_addr, "secret", Duration::from_secs(1), sessions)
            .unwrap();
        let handle = client.start().await.unwrap();

        let registry = relay.registry().clone();
        timeout(Duration::from_secs(2), async {
            while registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let tone = ToneSource::new(&ToneConfig {
            session_id: 42,
            frequency_hz: 440.0,
        })
        .unwrap()
        .spawn(relay.voice_sender());

        let stats_source = handle.sessions().clone();
        timeout(Duration::from_secs(5), async {
            while stats_source.stats().decoded_frames < 3 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let info = handle.sessions().session_info(42).unwrap();
        assert!(info.listen);
        assert_eq!(handle.sessions().stats().decode_errors, 0);

        tone.abort();
        handle.shutdown();
        relay.shutdown();
    }

    #[test]
    fn test_bind_rejects_sentinel_password() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let result = TunnelClient::bind(
            "127.0.0.1:9987".parse().unwrap(),
            "Ping",
            Duration::from_secs(2),
            sessions(),
        );
        assert!(result.is_err());
    }
}
