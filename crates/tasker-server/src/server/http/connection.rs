//! Per-connection tasks and their two-stage shutdown.
//!
//! Every accepted connection runs in its own task on a shared
//! [`TaskTracker`]. Shutdown happens in two steps:
//!
//! 1. `drain` asks each connection to finish gracefully: HTTP/1 connections
//!    close once the in-flight response is written and HTTP/2 connections
//!    send `GOAWAY` and finish their open streams.
//! 2. `abort` drops whatever is still running, cancelling outstanding
//!    requests.
//!
//! HTTP/2 streams are spawned through [`TrackedExecutor`], so they are waited
//! on and aborted together with the connections that own them.

use super::{HttpService, IncomingService};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Clone, Debug, Default)]
pub(crate) struct Connections {
    tracker: TaskTracker,
    drain: CancellationToken,
    abort: CancellationToken,
}

impl Connections {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serves `io` until the peer disconnects or shutdown reaches it.
    pub(crate) fn serve<IO>(&self, io: IO, service: HttpService, peer: String)
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let drain = self.drain.clone();
        let abort = self.abort.clone();
        let executor = TrackedExecutor {
            tracker: self.tracker.clone(),
            abort: self.abort.clone(),
        };
        let span = tracing::debug_span!("connection", peer = %peer);

        self.tracker.spawn(
            async move {
                // Detects HTTP/1.1 or the HTTP/2 prior-knowledge preface. An
                // HTTP/1.1 `Upgrade: h2c` request is answered over HTTP/1.1.
                let builder = ConnBuilder::new(executor);
                let conn = builder.serve_connection(TokioIo::new(io), IncomingService::new(service));
                tokio::pin!(conn);

                let res = tokio::select! {
                    res = conn.as_mut() => res,
                    () = drain.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        tokio::select! {
                            res = conn.as_mut() => res,
                            () = abort.cancelled() => {
                                tracing::debug!("connection aborted after grace period");
                                return;
                            }
                        }
                    }
                };

                if let Err(err) = res {
                    tracing::debug!("connection error: {err}");
                }
            }
            .instrument(span),
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Starts a graceful drain of every connection. New connections must not
    /// be handed to [`Connections::serve`] afterwards.
    pub(crate) fn drain(&self) {
        self.tracker.close();
        self.drain.cancel();
    }

    /// Drops every connection still running.
    pub(crate) fn abort(&self) {
        self.tracker.close();
        self.drain.cancel();
        self.abort.cancel();
    }

    /// Resolves once every connection task has finished. Only meaningful
    /// after [`Connections::drain`] or [`Connections::abort`].
    pub(crate) async fn wait(&self) {
        self.tracker.wait().await;
    }
}

/// Spawns HTTP/2 stream tasks on the connection tracker.
#[derive(Clone)]
struct TrackedExecutor {
    tracker: TaskTracker,
    abort: CancellationToken,
}

impl<F> hyper::rt::Executor<F> for TrackedExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        let abort = self.abort.clone();
        self.tracker.spawn(
            async move {
                tokio::select! {
                    _ = fut => {}
                    () = abort.cancelled() => {}
                }
            }
            .in_current_span(),
        );
    }
}
