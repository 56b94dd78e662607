//! Per-protocol probe engines
//!
//! Each prober owns its socket (or browser) for the duration of one call,
//! honors the shared deadline and cancellation token, and contributes
//! whatever it has collected when either fires. Transport failures degrade
//! to an empty contribution; they never abort the scan.

pub mod mdns;
pub mod upnp;
pub mod wsd;

use crate::DiscoveryError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Build a UDP socket for multicast probing.
///
/// The socket is nonblocking, carries the requested multicast TTL and is
/// bound to an ephemeral port on `interface_ip` (or INADDR_ANY). When an
/// IPv4 interface address is given it is also installed as the outgoing
/// multicast interface.
pub(crate) fn multicast_socket(
    ttl: u8,
    interface_ip: Option<IpAddr>,
) -> crate::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::Transport(format!("socket creation failed: {}", e)))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
    socket
        .set_multicast_ttl_v4(u32::from(ttl))
        .map_err(|e| DiscoveryError::Transport(format!("failed to set multicast TTL: {}", e)))?;

    let bind_addr = match interface_ip {
        Some(IpAddr::V4(v4)) => {
            socket
                .set_multicast_if_v4(&v4)
                .map_err(|e| {
                    DiscoveryError::Transport(format!("failed to set multicast interface: {}", e))
                })?;
            SocketAddr::new(IpAddr::V4(v4), 0)
        }
        Some(addr) => SocketAddr::new(addr, 0),
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
    };

    socket
        .bind(&bind_addr.into())
        .map_err(|e| DiscoveryError::Transport(format!("bind to {} failed: {}", bind_addr, e)))?;

    UdpSocket::from_std(socket.into())
        .map_err(|e| DiscoveryError::Transport(format!("socket registration failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multicast_socket_binds_ephemeral() {
        let socket = multicast_socket(2, None).unwrap();
        let local = socket.local_addr().unwrap();
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_multicast_socket_released_on_drop() {
        let socket = multicast_socket(2, None).unwrap();
        let local = socket.local_addr().unwrap();
        drop(socket);
        // The port must be bindable again once the prober socket is gone.
        let rebound = tokio::net::UdpSocket::bind(local).await;
        assert!(rebound.is_ok());
    }
}
