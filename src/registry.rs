//! Listener registry of the relay server
//!
//! Tracks which endpoints receive relayed voice and when each one was last
//! heard from. The registration handler and the eviction sweep mutate it;
//! the relay dispatcher reads snapshots. All access goes through one mutex,
//! which is never held while sending.

use parking_lot::Mutex;
use std::net::SocketAddr;

use crate::config::validate_password;
use crate::error::Error;
use crate::protocol::ServerDatagram;

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// A listener subscribed to relayed audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredClient {
    /// Endpoint identity, unique within the registry
    pub addr: SocketAddr,
    /// Last registration or keepalive, in seconds
    pub last_seen: u64,
}

/// Outcome of handling one datagram, mostly for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    Registered,
    Refreshed,
    KeepaliveUnknown,
    Rejected,
}

/// Thread-safe listener registry
pub struct ClientRegistry {
    password: Vec<u8>,
    clients: Mutex<Vec<RegisteredClient>>,
}

impl ClientRegistry {
    /// Create a registry accepting `password` as registration token
    pub fn new(password: &str) -> Result<Self, Error> {
        validate_password(password)?;
        Ok(Self {
            password: password.as_bytes().to_vec(),
            clients: Mutex::new(Vec::new()),
        })
    }

    /// Apply the datagram dispatch rule to one received datagram
    pub fn handle_datagram(&self, from: SocketAddr, data: &[u8], now: u64) -> DatagramOutcome {
        match ServerDatagram::classify(data, &self.password) {
            ServerDatagram::Keepalive => {
                let refreshed = self.touch(from, now);
                tracing::debug!("Client ping from {}", from);
                if refreshed {
                    DatagramOutcome::Refreshed
                } else {
                    DatagramOutcome::KeepaliveUnknown
                }
            }
            ServerDatagram::Registration => {
                let outcome = {
                    let mut clients = self.clients.lock();
                    match clients.iter_mut().find(|c| c.addr == from) {
                        Some(client) => {
                            client.last_seen = now;
                            DatagramOutcome::Refreshed
                        }
                        None => {
                            clients.push(RegisteredClient {
                                addr: from,
                                last_seen: now,
                            });
                            DatagramOutcome::Registered
                        }
                    }
                };

                match outcome {
                    DatagramOutcome::Registered => tracing::info!("Client connected from {}", from),
                    _ => tracing::info!("Client re-registered from {}", from),
                }
                outcome
            }
            ServerDatagram::Unrecognized => {
                tracing::warn!("Bad password from {} ({} bytes)", from, data.len());
                DatagramOutcome::Rejected
            }
        }
    }

    fn touch(&self, addr: SocketAddr, now: u64) -> bool {
        let mut clients = self.clients.lock();
        match clients.iter_mut().find(|c| c.addr == addr) {
            Some(client) => {
                client.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Remove every client not heard from for more than `threshold` seconds
    pub fn sweep_expired(&self, now: u64, threshold: u64) -> Vec<SocketAddr> {
        let mut removed = Vec::new();
        self.clients.lock().retain(|client| {
            let expired = now.saturating_sub(client.last_seen) > threshold;
            if expired {
                removed.push(client.addr);
            }
            !expired
        });

        for addr in &removed {
            tracing::info!("Client disconnected from {}", addr);
        }
        removed
    }

    /// Snapshot of the current listener endpoints
    pub fn listeners(&self) -> Vec<SocketAddr> {
        self.clients.lock().iter().map(|c| c.addr).collect()
    }

    /// Look up one client
    pub fn get(&self, addr: SocketAddr) -> Option<RegisteredClient> {
        self.clients.lock().iter().find(|c| c.addr == addr).copied()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_registration_records_receipt_time() {
        let registry = ClientRegistry::new("secret").unwrap();
        let outcome = registry.handle_datagram(addr(5000), b"secret", 100);

        assert_eq!(outcome, DatagramOutcome::Registered);
        let client = registry.get(addr(5000)).unwrap();
        assert_eq!(client.last_seen, 100);
    }

    #[test]
    fn test_reregistration_refreshes_in_place() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 100);
        let outcome = registry.handle_datagram(addr(5000), b"secret", 105);

        assert_eq!(outcome, DatagramOutcome::Refreshed);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(addr(5000)).unwrap().last_seen, 105);
    }

    #[test]
    fn test_same_address_different_port_is_distinct() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 1);
        registry.handle_datagram(addr(5001), b"secret", 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_keepalive_refreshes_known_client_only() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 10);

        assert_eq!(
            registry.handle_datagram(addr(5000), b"Ping", 11),
            DatagramOutcome::Refreshed
        );
        assert_eq!(registry.get(addr(5000)).unwrap().last_seen, 11);

        assert_eq!(
            registry.handle_datagram(addr(6000), b"Ping", 11),
            DatagramOutcome::KeepaliveUnknown
        );
        assert!(registry.get(addr(6000)).is_none());
    }

    #[test]
    fn test_bad_password_is_discarded() {
        let registry = ClientRegistry::new("secret").unwrap();
        assert_eq!(
            registry.handle_datagram(addr(5000), b"wrong", 1),
            DatagramOutcome::Rejected
        );
        assert_eq!(
            registry.handle_datagram(addr(5000), &[0, 4, 0, 0, 0, 0, 0, 0, 0, 7, 1, 2, 3, 4], 1),
            DatagramOutcome::Rejected
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_password_equal_to_sentinel_rejected() {
        assert!(ClientRegistry::new("Ping").is_err());
        assert!(ClientRegistry::new("").is_err());
    }

    #[test]
    fn test_eviction_scenario() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 0);

        assert!(registry.sweep_expired(1, 2).is_empty());
        assert!(registry.get(addr(5000)).is_some());

        assert_eq!(registry.sweep_expired(3, 2), vec![addr(5000)]);
        assert!(registry.is_empty());

        // Second sweep with no new data is a no-op
        assert!(registry.sweep_expired(3, 2).is_empty());
    }

    #[test]
    fn test_sweep_boundary_is_strict() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 10);
        assert!(registry.sweep_expired(12, 2).is_empty());
        assert_eq!(registry.sweep_expired(13, 2).len(), 1);
    }

    #[test]
    fn test_sweep_keeps_live_clients() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 0);
        registry.handle_datagram(addr(5001), b"secret", 0);
        registry.handle_datagram(addr(5001), b"Ping", 4);

        assert_eq!(registry.sweep_expired(5, 2), vec![addr(5000)]);
        assert_eq!(registry.listeners(), vec![addr(5001)]);
    }

    #[test]
    fn test_clock_going_backwards_does_not_evict() {
        let registry = ClientRegistry::new("secret").unwrap();
        registry.handle_datagram(addr(5000), b"secret", 100);
        assert!(registry.sweep_expired(50, 2).is_empty());
    }

    #[test]
    fn test_concurrent_registration_and_sweep() {
        let registry = Arc::new(ClientRegistry::new("secret").unwrap());

        let handles: Vec<_> = (0..4u16)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100u16 {
                        registry.handle_datagram(addr(10000 + t * 100 + i), b"secret", 50);
                        registry.sweep_expired(50, 2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 400);
    }
}
