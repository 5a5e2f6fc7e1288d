//! Listener binding for the supported network families.

use super::error::{Result, ServerError};
use super::options::Network;
use core::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpListener, TcpStream};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Address a running server is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ListenAddr {
    /// The bound TCP port, `None` for Unix sockets.
    pub fn port(&self) -> Option<u16> {
        self.as_tcp().map(|addr| addr.port())
    }

    pub fn as_tcp(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(addr) => Some(*addr),
            Self::Unix(_) => None,
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

pub(crate) enum Accepted {
    Tcp(TcpStream, SocketAddr),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// A bound listener. Dropping a Unix listener removes its socket file.
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    pub(crate) async fn bind(network: Network, address: &str) -> Result<Self> {
        let bound = match network {
            Network::Tcp => TcpListener::bind(address).await.map(Self::Tcp),
            Network::Tcp4 => bind_family(address, SocketAddr::is_ipv4).await,
            Network::Tcp6 => bind_family(address, SocketAddr::is_ipv6).await,
            Network::Unix => bind_unix(address),
        };
        bound.map_err(|source| ServerError::Bind {
            network,
            address: address.to_owned(),
            source,
        })
    }

    pub(crate) fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().map(ListenAddr::Tcp),
            #[cfg(unix)]
            Self::Unix(_, path) => Ok(ListenAddr::Unix(path.clone())),
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<Accepted> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                // Small RPC responses should not wait on Nagle.
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::debug!(peer = %peer, "failed to set TCP_NODELAY: {err}");
                }
                Ok(Accepted::Tcp(stream, peer))
            }
            #[cfg(unix)]
            Self::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                Ok(Accepted::Unix(stream))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Self::Unix(_, path) = self {
            if let Err(err) = std::fs::remove_file(&*path) {
                tracing::debug!(path = %path.display(), "failed to remove socket file: {err}");
            }
        }
    }
}

async fn bind_family(address: &str, family: fn(&SocketAddr) -> bool) -> io::Result<Listener> {
    let mut last_err = None;
    for addr in tokio::net::lookup_host(address).await?.filter(family) {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(Listener::Tcp(listener)),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no address of the requested family",
        )
    }))
}

#[cfg(unix)]
fn bind_unix(path: &str) -> io::Result<Listener> {
    let listener = UnixListener::bind(path)?;
    Ok(Listener::Unix(listener, PathBuf::from(path)))
}

#[cfg(not(unix))]
fn bind_unix(_path: &str) -> io::Result<Listener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Unix domain sockets are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp4_binds_an_ipv4_address() {
        let listener = Listener::bind(Network::Tcp4, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.as_tcp().unwrap().is_ipv4());
        assert_ne!(addr.port(), Some(0));
    }

    #[tokio::test]
    async fn tcp6_refuses_an_ipv4_address() {
        let err = Listener::bind(Network::Tcp6, "127.0.0.1:0")
            .await
            .err()
            .unwrap();
        match err {
            ServerError::Bind {
                network, source, ..
            } => {
                assert_eq!(network, Network::Tcp6);
                assert_eq!(source.kind(), io::ErrorKind::AddrNotAvailable);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bind_error_names_network_and_address() {
        let taken = Listener::bind(Network::Tcp, "127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = Listener::bind(Network::Tcp, &addr).await.err().unwrap();
        let message = err.to_string();
        assert!(message.contains("\"tcp\""), "{message}");
        assert!(message.contains(&addr), "{message}");
    }

    #[tokio::test]
    async fn accepted_tcp_streams_disable_nagle() {
        let listener = Listener::bind(Network::Tcp, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().as_tcp().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        match listener.accept().await.unwrap() {
            Accepted::Tcp(stream, peer) => {
                assert!(stream.nodelay().unwrap());
                assert_eq!(peer, client.local_addr().unwrap());
            }
            #[cfg(unix)]
            Accepted::Unix(_) => panic!("expected a TCP stream"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_unix_listener_removes_socket() {
        let path = std::env::temp_dir().join(format!("tasker-listener-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        let listener = Listener::bind(Network::Unix, path_str).await.unwrap();
        assert_eq!(listener.local_addr().unwrap(), ListenAddr::Unix(path.clone()));
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }
}
