//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

use crate::error::NetworkError;

/// Kernel buffer size requested for relay sockets
const SOCKET_BUFFER_SIZE: usize = 1 << 20;

/// Create a non-blocking UDP socket bound to `addr`.
///
/// Must be called from within a tokio runtime.
pub fn create_socket(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    // Best effort, the kernel may clamp these
    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Could not set receive buffer size: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Could not set send buffer size: {}", e);
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    UdpSocket::from_std(socket.into()).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Wildcard address on an ephemeral port, same family as `remote`
pub fn ephemeral_addr_for(remote: SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_socket_ephemeral() {
        let socket = create_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_ephemeral_addr_family() {
        let v4 = ephemeral_addr_for("10.0.0.1:9987".parse().unwrap());
        assert!(v4.is_ipv4());
        assert_eq!(v4.port(), 0);

        let v6 = ephemeral_addr_for("[::1]:9987".parse().unwrap());
        assert!(v6.is_ipv6());
    }
}
