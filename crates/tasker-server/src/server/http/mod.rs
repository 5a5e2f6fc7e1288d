//! HTTP server lifecycle: binding, routing, middleware and graceful shutdown.
//!
//! An [`HttpServer`] is configured up front (options, routes, services,
//! middleware) and then driven by [`HttpServer::run`], which serves until the
//! given [`CancellationToken`] fires. Setup methods take `&mut self`, so the
//! route table and middleware chain are fixed before the server can be shared
//! with the task running it.
//!
//! ## Run
//!
//! `run` binds the listener and publishes its address, then joins two tasks:
//!
//! - the accept loop, which hands every connection to its own task and stops
//!   accepting (closing the listener) as soon as shutdown starts;
//! - the shutdown watcher, which waits for the token, drains connections and
//!   aborts the remaining ones once the grace period elapses. It never fails.
//!
//! If the accept loop fails, the watcher is dropped, every connection is
//! aborted and the error is returned.
//!
//! ## Middleware
//!
//! Each middleware wraps the handler composed so far, so the one added last
//! sees requests first and responses last. Construction adds request tracing
//! and then response compression (gzip, deflate), which therefore sit closest
//! to the routes. HTTP/2 over plaintext (prior knowledge) is detected by the
//! connection builder itself and needs no middleware. Clients asking for h2c
//! through an HTTP/1.1 `Upgrade` are served over HTTP/1.1 instead.

mod connection;
mod error;
mod listener;
mod mux;
mod options;

pub use error::{Result, ServerError};
pub use listener::ListenAddr;
pub use options::{
    DEFAULT_ADDRESS, DEFAULT_GRACE_PERIOD, HttpConfig, Network, ServerOption, ServerOptions,
};

use crate::server::reflection::ReflectionService;
use crate::server::rpc::{self, RpcService};
use bytes::Bytes;
use connection::Connections;
use core::convert::Infallible;
use core::time::Duration;
use http::{Request, Response};
use http_body_util::{BodyExt, Empty, Full, combinators::UnsyncBoxBody};
use hyper::body::Incoming;
use listener::{Accepted, Listener};
use mux::{Mux, Routes};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::util::{BoxCloneSyncService, Oneshot};
use tower::{Layer, Service, ServiceExt};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

pub use tower::BoxError;

/// Request and response body used throughout the server.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// A type-erased, cloneable request handler.
pub type HttpService = BoxCloneSyncService<Request<Body>, Response<Body>, Infallible>;

/// Wraps the handler composed so far.
pub type Middleware = Box<dyn Fn(HttpService) -> HttpService + Send + Sync>;

const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub fn full(chunk: impl Into<Bytes>) -> Body {
    Full::new(chunk.into())
        .map_err(|never| -> BoxError { match never {} })
        .boxed_unsync()
}

pub fn empty() -> Body {
    Empty::new()
        .map_err(|never| -> BoxError { match never {} })
        .boxed_unsync()
}

fn boxed<B>(body: B) -> Body
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

pub struct HttpServer {
    options: ServerOptions,
    routes: Routes,
    middlewares: Vec<Middleware>,
    reflection: ReflectionService,
    addr: watch::Sender<Option<ListenAddr>>,
    started: AtomicBool,
}

impl HttpServer {
    /// Applies `options` over the defaults (`tcp`, `127.0.0.1:0`, 10 second
    /// grace period) and registers the reflection service and the built-in
    /// middleware.
    ///
    /// # Errors
    ///
    /// Fails without binding anything if an option is invalid.
    pub fn new(options: impl IntoIterator<Item = ServerOption>) -> Result<Self> {
        let options = ServerOptions::resolve(options)?;
        let reflection = ReflectionService::new();

        let mut server = Self {
            options,
            routes: Routes::default(),
            middlewares: Vec::new(),
            reflection: reflection.clone(),
            addr: watch::Sender::new(None),
            started: AtomicBool::new(false),
        };

        server.register_service(reflection)?;
        server.add_layer(TraceLayer::new_for_http());
        server.add_layer(CompressionLayer::new().gzip(true).deflate(true));

        Ok(server)
    }

    pub const fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub const fn reflection(&self) -> &ReflectionService {
        &self.reflection
    }

    /// Routes requests matching `pattern` to `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidPattern`] for patterns not starting with
    /// `/` and [`ServerError::DuplicateRoute`] if `pattern` is taken.
    pub fn handle<S>(&mut self, pattern: &str, service: S) -> Result<()>
    where
        S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.routes.insert(pattern, HttpService::new(service))
    }

    /// Mounts an RPC service at its path prefix and lists it in reflection.
    pub fn register_service<S: RpcService>(&mut self, service: S) -> Result<()> {
        let descriptor = service.descriptor();
        self.handle(&descriptor.path_prefix, rpc::into_http_service(service))?;
        self.reflection.register(descriptor);
        Ok(())
    }

    pub fn add_middleware<F>(&mut self, middleware: F)
    where
        F: Fn(HttpService) -> HttpService + Send + Sync + 'static,
    {
        self.middlewares.push(Box::new(middleware));
    }

    /// Adds a `tower` layer as a middleware, boxing its response body.
    pub fn add_layer<L, S, B>(&mut self, layer: L)
    where
        L: Layer<HttpService, Service = S> + Send + Sync + 'static,
        S: Service<Request<Body>, Response = Response<B>, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.add_middleware(move |inner| {
            HttpService::new(
                layer
                    .layer(inner)
                    .map_response(|res: Response<B>| res.map(boxed)),
            )
        });
    }

    /// The route table wrapped in every middleware, as served by `run`.
    pub fn service(&self) -> HttpService {
        let mux = HttpService::new(Mux::new(self.routes.clone()));
        self.middlewares
            .iter()
            .fold(mux, |inner, middleware| middleware(inner))
    }

    /// Binds the listener and serves until `shutdown` fires.
    ///
    /// Once shutdown starts, no new connections are accepted and in-flight
    /// requests get the configured grace period to complete; whatever is left
    /// after that is dropped. Returns after every connection is gone. A server
    /// runs at most once.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyStarted`] on a second call.
    /// - [`ServerError::Bind`] if the listener cannot be created.
    /// - [`ServerError::Accept`] if the listener fails while serving.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = Listener::bind(self.options.network, &self.options.address).await?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            network: self.options.network,
            address: self.options.address.clone(),
            source,
        })?;
        tracing::info!(network = %self.options.network, address = %addr, "HTTP server listening");
        self.addr.send_replace(Some(addr));

        let connections = Connections::new();
        let group = shutdown.child_token();

        let result = tokio::try_join!(
            accept_loop(listener, self.service(), &connections, &group),
            drain_on_shutdown(&group, &connections, self.options.grace_period),
        )
        .map(|_| ());

        if let Err(err) = &result {
            tracing::error!("HTTP server failed: {err}");
            group.cancel();
            connections.abort();
            connections.wait().await;
        }

        self.addr.send_replace(None);
        tracing::info!("HTTP server stopped");
        result
    }

    /// Waits until `run` has bound its listener and returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Cancelled`] once `cancel` fires, even if an
    /// address is available.
    pub async fn wait_for_address(&self, cancel: &CancellationToken) -> Result<ListenAddr> {
        let mut rx = self.addr.subscribe();
        let published = async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|addr| Option::clone(&addr))
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ServerError::Cancelled),
            addr = published => addr.ok_or(ServerError::Cancelled),
        }
    }

    /// The bound address while `run` is serving.
    pub fn local_addr(&self) -> Option<ListenAddr> {
        self.addr.borrow().clone()
    }
}

async fn accept_loop(
    listener: Listener,
    service: HttpService,
    connections: &Connections,
    stop: &CancellationToken,
) -> Result<()> {
    loop {
        let accepted = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(Accepted::Tcp(stream, peer)) => {
                connections.serve(stream, service.clone(), peer.to_string());
            }
            #[cfg(unix)]
            Ok(Accepted::Unix(stream)) => {
                connections.serve(stream, service.clone(), "unix".to_owned());
            }
            Err(err) if is_connection_error(&err) => {
                tracing::debug!("accepted connection failed: {err}");
            }
            Err(err) if is_listener_error(&err) => {
                return Err(ServerError::Accept(err));
            }
            Err(err) => {
                // Usually descriptor exhaustion; give in-flight connections a
                // chance to close before trying again.
                tracing::warn!("accept error: {err}, retrying in {ACCEPT_BACKOFF:?}");
                tokio::select! {
                    () = stop.cancelled() => return Ok(()),
                    () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
}

async fn drain_on_shutdown(
    shutdown: &CancellationToken,
    connections: &Connections,
    grace_period: Duration,
) -> Result<()> {
    shutdown.cancelled().await;
    tracing::info!(connections = connections.len(), "shutdown requested, draining connections");

    connections.drain();
    if tokio::time::timeout(grace_period, connections.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = connections.len(),
            "grace period of {grace_period:?} elapsed, aborting connections"
        );
        connections.abort();
        connections.wait().await;
    }
    Ok(())
}

fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn is_listener_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported | io::ErrorKind::NotConnected
    )
}

/// Adapts an [`HttpService`] to the request body hyper hands out.
#[derive(Clone)]
pub(crate) struct IncomingService {
    inner: HttpService,
}

impl IncomingService {
    pub(crate) const fn new(inner: HttpService) -> Self {
        Self { inner }
    }
}

impl hyper::service::Service<Request<Incoming>> for IncomingService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Oneshot<HttpService, Request<Body>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        self.inner.clone().oneshot(req.map(boxed))
    }
}
