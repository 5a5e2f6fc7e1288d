//! Error types for the HTTP server lifecycle.
//!
//! ## Error Cases
//! - `EmptyNetwork` / `UnsupportedNetwork` / `EmptyAddress`: rejected options,
//!   reported by [`HttpServer::new`](super::HttpServer::new) before anything
//!   is bound.
//! - `Bind`: the listener could not be created. Carries the network and
//!   address that were attempted.
//! - `Accept`: the listener failed in a way that ends serving.
//! - `DuplicateRoute` / `InvalidPattern`: route registration failures.
//! - `AlreadyStarted`: `run` was called on a server that already ran.
//! - `Cancelled`: a wait was abandoned because its token fired.

use super::options::Network;

pub type Result<T> = core::result::Result<T, ServerError>;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to create HTTP server: network must not be empty")]
    EmptyNetwork,

    #[error("failed to create HTTP server: unsupported network {network:?}")]
    UnsupportedNetwork { network: String },

    #[error("failed to create HTTP server: address must not be empty")]
    EmptyAddress,

    #[error("failed to listen {:?} {address:?}: {source}", .network.as_str())]
    Bind {
        network: Network,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("a handler is already registered for {pattern:?}")]
    DuplicateRoute { pattern: String },

    #[error("invalid route pattern {pattern:?}: patterns must start with '/'")]
    InvalidPattern { pattern: String },

    #[error("server has already been started")]
    AlreadyStarted,

    #[error("operation cancelled")]
    Cancelled,
}
