//! Construction options for [`HttpServer`](super::HttpServer).
//!
//! Options are plain values applied in order to a [`ServerOptions`] that starts
//! from the defaults. Each one validates what it sets, so an invalid network
//! or address fails server construction instead of surfacing at bind time.

use super::HttpServer;
use super::error::{Result, ServerError};
use core::fmt;
use core::str::FromStr;
use core::time::Duration;

/// How long in-flight requests may run after shutdown starts before their
/// connections are dropped.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Loopback with an ephemeral port.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:0";

/// Stream-oriented listener families.
///
/// Connectionless families (`udp`, `udp4`, `udp6`, `unixgram`) and
/// `unixpacket` cannot carry HTTP and are rejected when parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    /// TCP over whichever IP family the address resolves to.
    #[default]
    Tcp,
    /// TCP restricted to IPv4 addresses.
    Tcp4,
    /// TCP restricted to IPv6 addresses.
    Tcp6,
    /// Unix domain stream socket; the address is a filesystem path.
    Unix,
}

impl Network {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
            Self::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(ServerError::EmptyNetwork),
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            "unix" => Ok(Self::Unix),
            other => Err(ServerError::UnsupportedNetwork {
                network: other.to_owned(),
            }),
        }
    }
}

/// Resolved server configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    pub network: Network,
    pub address: String,
    pub grace_period: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            address: DEFAULT_ADDRESS.to_owned(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl ServerOptions {
    /// Applies `options` in order on top of the defaults, stopping at the
    /// first invalid one.
    pub fn resolve(options: impl IntoIterator<Item = ServerOption>) -> Result<Self> {
        let mut resolved = Self::default();
        for option in options {
            option.apply(&mut resolved)?;
        }
        Ok(resolved)
    }
}

/// A single construction option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerOption {
    Address { network: String, address: String },
    GracePeriod(Duration),
}

impl ServerOption {
    /// Listen on `address` using `network` (`tcp`, `tcp4`, `tcp6` or `unix`).
    pub fn address(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self::Address {
            network: network.into(),
            address: address.into(),
        }
    }

    /// Bound on how long shutdown waits for in-flight requests.
    pub const fn grace_period(period: Duration) -> Self {
        Self::GracePeriod(period)
    }

    fn apply(self, options: &mut ServerOptions) -> Result<()> {
        match self {
            Self::Address { network, address } => {
                let network = network.parse()?;
                if address.is_empty() {
                    return Err(ServerError::EmptyAddress);
                }
                options.network = network;
                options.address = address;
            }
            Self::GracePeriod(period) => options.grace_period = period,
        }
        Ok(())
    }
}

/// Configuration-struct entry point, as produced by the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpConfig {
    pub network: String,
    pub address: String,
    pub grace_period: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp.to_string(),
            address: "127.0.0.1:8080".to_owned(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl HttpConfig {
    pub fn options(&self) -> Vec<ServerOption> {
        vec![
            ServerOption::address(&self.network, &self.address),
            ServerOption::grace_period(self.grace_period),
        ]
    }

    pub fn build(&self) -> Result<HttpServer> {
        HttpServer::new(self.options())
    }
}
