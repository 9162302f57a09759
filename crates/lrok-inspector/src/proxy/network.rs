//! Listener creation for the proxy and dashboard.

use crate::error::StartupError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::warn;

/// Create a non-blocking TCP listener with `SO_REUSEADDR` set.
pub fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Resolve the listen host. Anything that is not an IP literal (such as
/// `localhost`) binds loopback.
pub fn listen_addr(host: &str, port: u16) -> SocketAddr {
    let ip = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    SocketAddr::new(ip, port)
}

/// Bind `host:port`, falling back to an OS-assigned port when the preferred
/// port is unavailable. Fails only if the fallback bind fails too.
pub fn bind_with_fallback(host: &str, port: u16) -> Result<TcpListener, StartupError> {
    let preferred = listen_addr(host, port);
    match create_listener(preferred) {
        Ok(listener) => Ok(listener),
        Err(e) if port != 0 => {
            warn!(
                "Port {} unavailable ({}), falling back to an ephemeral port",
                port, e
            );
            let fallback = SocketAddr::new(preferred.ip(), 0);
            create_listener(fallback).map_err(|source| StartupError::Bind {
                addr: fallback,
                source,
            })
        }
        Err(source) => Err(StartupError::Bind {
            addr: preferred,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let listener = bind_with_fallback("127.0.0.1", 0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_when_port_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let listener = bind_with_fallback("127.0.0.1", port).unwrap();
        let bound = listener.local_addr().unwrap().port();
        assert_ne!(bound, port);
        assert_ne!(bound, 0);
    }

    #[tokio::test]
    async fn test_unassignable_address_is_bind_error() {
        // TEST-NET-1 is never assigned to a local interface.
        let err = bind_with_fallback("192.0.2.1", 0).unwrap_err();
        assert!(matches!(err, StartupError::Bind { .. }));
    }

    #[test]
    fn test_listen_addr_resolution() {
        assert_eq!(listen_addr("localhost", 80).to_string(), "127.0.0.1:80");
        assert_eq!(listen_addr("0.0.0.0", 81).to_string(), "0.0.0.0:81");
        assert_eq!(listen_addr("[::1]", 82).to_string(), "[::1]:82");
    }
}
