//! Listener binding with a small port scan

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

use crate::error::NetworkError;

/// Bind the first free port in `base..base + count` on `bind`.
///
/// Nothing stays open when every candidate is taken.
pub fn bind_first_free(bind: IpAddr, base: u16, count: u16) -> Result<TcpListener, NetworkError> {
    for offset in 0..count {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::new(bind, port);
        match try_bind(addr) {
            Ok(listener) => {
                tracing::debug!("Bound {}", addr);
                return Ok(listener);
            }
            Err(e) => {
                tracing::debug!("Port {} unavailable: {}", port, e);
            }
        }
    }
    Err(NetworkError::PortExhausted { base, count })
}

fn try_bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Bind for use inside the tokio runtime
pub fn bind_tokio(bind: IpAddr, base: u16, count: u16) -> Result<tokio::net::TcpListener, NetworkError> {
    let listener = bind_first_free(bind, base, count)?;
    tokio::net::TcpListener::from_std(listener).map_err(|e| NetworkError::Transport(e.to_string()))
}

/// Address a receiver should use to reach a server bound on `bind`.
///
/// For a wildcard bind this is the local interface that routes to
/// `remote`, or to the default route when no remote is known.
pub fn advertised_ip(bind: IpAddr, remote: Option<&str>) -> IpAddr {
    if !bind.is_unspecified() {
        return bind;
    }
    let target = remote
        .and_then(|r| r.parse::<IpAddr>().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
    if target.is_loopback() {
        return target;
    }
    route_local_ip(target).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Local address chosen by the routing table; a UDP connect sends nothing
fn route_local_ip(remote: IpAddr) -> Option<IpAddr> {
    let local = match remote {
        IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        IpAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(local).ok()?;
    socket.connect(SocketAddr::new(remote, 9)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}
