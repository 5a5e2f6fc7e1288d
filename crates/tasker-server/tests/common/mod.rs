#![allow(dead_code)]

use bytes::Bytes;
use core::time::Duration;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, Method, Request, StatusCode, Version};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::Arc;
use tasker_server::{HttpServer, ServerError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const REFLECTION: &str = "/twirp/twirp.reflection.v1.ReflectionService/";
pub const TASKS: &str = "/twirp/tasker.v1.TaskService/";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A server running on a background task.
pub struct Running {
    pub server: Arc<HttpServer>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    pub async fn start(server: HttpServer) -> Self {
        let server = Arc::new(server);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            let shutdown = shutdown.clone();
            async move { server.run(shutdown).await }
        });
        Self {
            server,
            shutdown,
            handle,
        }
    }

    pub async fn addr(&self) -> SocketAddr {
        let cancel = CancellationToken::new();
        let addr = timeout(Duration::from_secs(5), self.server.wait_for_address(&cancel))
            .await
            .expect("address was never published")
            .expect("wait_for_address failed");
        addr.as_tcp().expect("not a TCP address")
    }

    /// Signals shutdown and waits for `run` to return.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.cancel();
        timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("run did not return")
            .expect("server task panicked")
    }
}

#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response is not JSON")
    }
}

pub fn json_request(method: Method, uri: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(HOST, "localhost")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_owned())))
        .expect("invalid request")
}

/// Sends one request over a fresh HTTP/1.1 connection.
pub async fn send_http1<IO>(io: IO, req: Request<Full<Bytes>>) -> Result<Reply, BoxError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(conn);
    let res = sender.send_request(req).await?;
    collect(res).await
}

/// Sends one request over a fresh HTTP/2 prior-knowledge connection.
pub async fn send_http2(addr: SocketAddr, req: Request<Full<Bytes>>) -> Result<Reply, BoxError> {
    let stream = TcpStream::connect(addr).await?;
    let (mut sender, conn) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream)).await?;
    tokio::spawn(conn);
    let res = sender.send_request(req).await?;
    collect(res).await
}

async fn collect(res: http::Response<hyper::body::Incoming>) -> Result<Reply, BoxError> {
    let (parts, body) = res.into_parts();
    Ok(Reply {
        status: parts.status,
        version: parts.version,
        headers: parts.headers,
        body: body.collect().await?.to_bytes(),
    })
}

/// `POST`s a JSON body to `path` over HTTP/1.1.
pub async fn post(addr: SocketAddr, path: &str, body: &str) -> Reply {
    let stream = TcpStream::connect(addr).await.expect("connect failed");
    send_http1(stream, json_request(Method::POST, path, body))
        .await
        .expect("request failed")
}
