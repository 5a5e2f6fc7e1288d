//! JSON RPC over HTTP, Twirp style.
//!
//! A service lives under a path prefix such as `/twirp/tasker.v1.TaskService/`
//! and exposes each method at `<prefix><Method>`. Requests are `POST`s with an
//! `application/json` body. Errors are answered with a JSON body of the form
//! `{"code": "...", "msg": "..."}` and an HTTP status matching the code.
//!
//! Implement [`RpcService`] and mount it with
//! [`HttpServer::register_service`](crate::server::http::HttpServer::register_service).

use crate::server::http::{Body, HttpService, full};
use bytes::Bytes;
use core::convert::Infallible;
use core::fmt;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Collected, Limited};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;

/// Largest request body accepted, in bytes.
pub const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

const JSON: &str = "application/json";

/// Client-facing error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    Malformed,
    BadRoute,
    Internal,
    Unavailable,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::Malformed => "malformed",
            Self::BadRoute => "bad_route",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::NotFound | Self::BadRoute => StatusCode::NOT_FOUND,
            Self::InvalidArgument | Self::Malformed => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error answered to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {msg}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub msg: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, msg)
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, msg)
    }

    pub fn bad_route(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRoute, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    pub fn into_response(self) -> Response<Body> {
        let status = self.code.status();
        // Serializing a struct of two strings cannot fail.
        let body = serde_json::to_vec(&self).unwrap_or_default();
        let mut res = json_body(body);
        *res.status_mut() = status;
        res
    }
}

impl From<tasker_core::Error> for RpcError {
    fn from(err: tasker_core::Error) -> Self {
        use tasker_core::Error;

        let code = match &err {
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::InvalidRequest { .. } | Error::InvalidArguments { .. } => {
                ErrorCode::InvalidArgument
            }
            Error::CacheClosed(_) => ErrorCode::Unavailable,
            Error::Database { .. }
            | Error::StatementKind { .. }
            | Error::StatementReleased => ErrorCode::Internal,
        };
        if code == ErrorCode::Internal {
            tracing::error!("request failed: {err}");
        }
        Self::new(code, err.to_string())
    }
}

/// What reflection reports about a mounted service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Fully qualified name, e.g. `tasker.v1.TaskService`.
    pub name: String,
    /// Route prefix, always `/twirp/<name>/`.
    pub path_prefix: String,
    pub methods: Vec<String>,
}

impl ServiceDescriptor {
    pub fn new(name: &str, methods: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            path_prefix: format!("/twirp/{name}/"),
            methods: methods.iter().map(|&m| m.to_owned()).collect(),
        }
    }
}

/// A JSON RPC service mounted under its descriptor's path prefix.
pub trait RpcService: Clone + Send + Sync + 'static {
    fn descriptor(&self) -> ServiceDescriptor;

    /// Runs `method` with the raw JSON request body.
    fn dispatch(
        &self,
        method: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<Response<Body>, RpcError>> + Send;
}

/// Decodes a JSON request message.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(body)
        .map_err(|err| RpcError::malformed(format!("failed to decode request: {err}")))
}

/// Encodes a JSON response message.
pub fn encode<T: Serialize>(message: &T) -> Result<Response<Body>, RpcError> {
    serde_json::to_vec(message)
        .map(json_body)
        .map_err(|err| RpcError::internal(format!("failed to encode response: {err}")))
}

fn json_body(body: Vec<u8>) -> Response<Body> {
    let mut res = Response::new(full(body));
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    res
}

/// Serves `service` as a plain [`HttpService`].
pub fn into_http_service<S: RpcService>(service: S) -> HttpService {
    let prefix = service.descriptor().path_prefix;
    HttpService::new(tower::service_fn(move |req: Request<Body>| {
        let service = service.clone();
        let prefix = prefix.clone();
        async move {
            let res = call(&service, &prefix, req)
                .await
                .unwrap_or_else(RpcError::into_response);
            Ok::<_, Infallible>(res)
        }
    }))
}

async fn call<S: RpcService>(
    service: &S,
    prefix: &str,
    req: Request<Body>,
) -> Result<Response<Body>, RpcError> {
    let path = req.uri().path();
    let method = path
        .strip_prefix(prefix)
        .filter(|method| !method.is_empty() && !method.contains('/'))
        .ok_or_else(|| RpcError::bad_route(format!("no handler for path {path:?}")))?
        .to_owned();

    if req.method() != Method::POST {
        return Err(RpcError::bad_route(format!(
            "unsupported method {} (only POST is allowed)",
            req.method()
        )));
    }

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with(JSON) {
        return Err(RpcError::bad_route(format!(
            "unexpected Content-Type: {content_type:?}"
        )));
    }

    let body = read_body(req.into_body()).await?;
    service.dispatch(&method, body).await
}

/// Collects at most [`MAX_REQUEST_BYTES`] of `body`.
fn read_body(body: Body) -> BoxFuture<'static, Result<Bytes, RpcError>> {
    let limited = Limited::new(
        body.map_err(io::Error::other),
        MAX_REQUEST_BYTES,
    );
    Box::pin(limited.collect().map(|result| {
        result
            .map(Collected::to_bytes)
            .map_err(|err| RpcError::malformed(format!("failed to read request body: {err}")))
    }))
}
