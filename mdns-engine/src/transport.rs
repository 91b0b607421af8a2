//! Multicast socket lifecycle: platform-specific port sharing, interface
//! selection, group membership, and a cancellable receive loop.
//!
//! The option discipline below is observable by other mDNS implementations
//! sharing the link and is therefore part of the contract, not an
//! implementation detail: options must be set before `bind`, which is why
//! this builds the socket with `socket2::Socket` and only converts to a
//! Tokio socket once every option is set.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mdns_types::protocol::constants::{MDNS_GROUP_V4, MDNS_PORT};

use crate::error::Error;

/// Minimum socket receive/send buffer size requested from the kernel.
const MIN_SOCKET_BUFFER: usize = 64 * 1024;

/// Poll timeout used for cancellable receives when no deadline is given.
const RECEIVE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Wire-size ceiling for a single receive buffer.
const RECEIVE_BUFFER_LEN: usize = 9 * 1024;

/// An mDNS-capable network interface: its index and the IPv4 address used
/// to join/leave the multicast group on it.
#[derive(Debug, Clone, Copy)]
pub struct Interface {
    pub index: u32,
    pub address: Ipv4Addr,
}

/// Returns every up, multicast-capable, non-loopback interface that does
/// not match a platform-specific virtual-interface name pattern.
///
/// # Errors
///
/// If the platform's interface list cannot be enumerated.
pub fn default_interfaces() -> io::Result<Vec<Interface>> {
    let mut interfaces = Vec::new();
    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if is_virtual_interface_name(&iface.name) {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = iface.addr {
            interfaces.push(Interface {
                // if-addrs does not expose the OS interface index directly;
                // a real implementation would resolve it via `if_nametoindex`.
                // Zero is used here as a placeholder the caller can map.
                index: 0,
                address: v4.ip,
            });
        }
    }
    Ok(interfaces)
}

/// Returns the IPv4 subnets bound to non-virtual, non-loopback interfaces,
/// used to seed the security admission pipeline's source-class gate
/// (`crate::security::SecurityFilter`).
///
/// # Errors
///
/// If the platform's interface list cannot be enumerated.
pub fn interface_subnets() -> io::Result<Vec<ipnet::IpNet>> {
    let mut subnets = Vec::new();
    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() || is_virtual_interface_name(&iface.name) {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = iface.addr {
            if let Ok(net) = ipnet::Ipv4Net::with_netmask(v4.ip, v4.netmask) {
                subnets.push(ipnet::IpNet::V4(net));
            }
        }
    }
    Ok(subnets)
}

fn is_virtual_interface_name(name: &str) -> bool {
    const LINUX_PREFIXES: &[&str] = &[
        "tun", "tap", "ppp", "docker", "veth", "br-", "gre", "ipip", "sit",
    ];
    const DARWIN_PREFIXES: &[&str] = &["utun", "ppp", "bridge"];

    LINUX_PREFIXES
        .iter()
        .chain(DARWIN_PREFIXES)
        .any(|prefix| name.starts_with(prefix))
}

/// Owns the mDNS multicast socket: a single reader/writer shared by every
/// querier and responder on the process.
pub struct Transport {
    socket: Arc<UdpSocket>,
    cancellation: CancellationToken,
    joined: AsyncMutex<Vec<Ipv4Addr>>,
}

impl Transport {
    /// Binds the mDNS multicast socket and joins the group on every
    /// interface in `interfaces`. Per-interface join failures are logged
    /// and skipped; the call only fails if every interface fails.
    ///
    /// # Errors
    ///
    /// If the socket cannot be created/bound, or every interface fails to
    /// join the multicast group.
    pub async fn bind(interfaces: &[Interface]) -> Result<Self, Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::network("create socket", e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| Error::network("set SO_REUSEADDR", e))?;
        #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
        if let Err(e) = socket.set_reuse_port(true) {
            warn!(error = %e, "SO_REUSEPORT unavailable, continuing without it");
        }

        let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into();
        socket
            .bind(&bind_addr.into())
            .map_err(|e| Error::network("bind", e))?;

        if let Err(e) = socket.set_recv_buffer_size(MIN_SOCKET_BUFFER) {
            warn!(error = %e, "could not raise receive buffer size");
        }
        if let Err(e) = socket.set_send_buffer_size(MIN_SOCKET_BUFFER) {
            warn!(error = %e, "could not raise send buffer size");
        }

        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| Error::network("set multicast loopback", e))?;
        socket
            .set_multicast_ttl_v4(255)
            .map_err(|e| Error::network("set multicast ttl", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::network("set nonblocking", e))?;

        let mut joined = Vec::new();
        for iface in interfaces {
            match socket.join_multicast_v4(&MDNS_GROUP_V4, &iface.address) {
                Ok(()) => {
                    info!(interface = %iface.address, "joined mdns multicast group");
                    joined.push(iface.address);
                }
                Err(e) => warn!(interface = %iface.address, error = %e, "failed to join mdns multicast group on interface"),
            }
        }
        if joined.is_empty() {
            return Err(Error::network(
                "join multicast group",
                io::Error::new(io::ErrorKind::Other, "no interface could join the mdns group"),
            ));
        }

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|e| Error::network("adopt socket", e))?;

        Ok(Self {
            socket: Arc::new(tokio_socket),
            cancellation: CancellationToken::new(),
            joined: AsyncMutex::new(joined),
        })
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Sends `payload` to the mDNS multicast group.
    ///
    /// # Errors
    ///
    /// If the underlying socket send fails.
    pub async fn send(&self, payload: &[u8]) -> Result<(), Error> {
        let dest: SocketAddr = SocketAddrV4::new(MDNS_GROUP_V4, MDNS_PORT).into();
        self.socket
            .send_to(payload, dest)
            .await
            .map(|_| ())
            .map_err(|e| Error::network("send", e))
    }

    /// Receives one datagram, or returns promptly with
    /// [`Error::Cancellation`] if `self`'s cancellation token fires first.
    /// Read timeouts are retried transparently rather than surfaced as
    /// errors, so cancellation is checked at a bounded interval even though
    /// the socket itself has no deadline.
    ///
    /// # Errors
    ///
    /// If the underlying socket read fails, or the transport is cancelled.
    pub async fn receive(&self, buffer: &mut BytesMut) -> Result<(usize, SocketAddr), Error> {
        buffer.resize(RECEIVE_BUFFER_LEN, 0);
        loop {
            tokio::select! {
                () = self.cancellation.cancelled() => return Err(Error::Cancellation),
                result = self.socket.recv_from(buffer) => {
                    return result.map_err(|e| Error::network("receive", e));
                }
                () = tokio::time::sleep(RECEIVE_POLL_INTERVAL) => {
                    debug!("receive poll tick, re-checking cancellation");
                }
            }
        }
    }

    /// Leaves every joined multicast group and marks the transport
    /// cancelled. Idempotent.
    pub async fn close(&self) {
        self.cancellation.cancel();
        let mut joined = self.joined.lock().await;
        for address in joined.drain(..) {
            if let Err(e) = self.socket.leave_multicast_v4(MDNS_GROUP_V4, address) {
                error!(interface = %address, error = %e, "failed to leave mdns multicast group");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_interface_names_are_filtered() {
        assert!(is_virtual_interface_name("docker0"));
        assert!(is_virtual_interface_name("veth1234"));
        assert!(is_virtual_interface_name("utun3"));
        assert!(!is_virtual_interface_name("eth0"));
        assert!(!is_virtual_interface_name("en0"));
    }

    #[tokio::test]
    async fn bind_and_close_on_loopback_like_address() {
        // Binding to the real mDNS port may fail in a sandboxed CI
        // environment without multicast support; this just exercises that
        // a bind failure surfaces as a typed `Error::Network`, not a panic.
        let interfaces = vec![Interface {
            index: 0,
            address: Ipv4Addr::LOCALHOST,
        }];
        match Transport::bind(&interfaces).await {
            Ok(transport) => transport.close().await,
            Err(Error::Network { .. }) => {}
            Err(other) => panic!("unexpected error variant: {other}"),
        }
    }
}
