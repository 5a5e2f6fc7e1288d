//! Path based request routing.
//!
//! A pattern without a trailing `/` matches that exact path. A pattern ending
//! in `/` names a subtree and matches every path below it; the longest
//! matching subtree wins. Requests that match nothing get `404 Not Found`.

use super::error::ServerError;
use super::{Body, HttpService, empty};
use core::convert::Infallible;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use tower::{Service, ServiceExt};

const SUBTREE: &str = "{*rest}";

#[derive(Clone, Default)]
pub(crate) struct Routes {
    tree: matchit::Router<HttpService>,
    patterns: HashSet<String>,
}

impl Routes {
    pub(crate) fn insert(&mut self, pattern: &str, service: HttpService) -> Result<(), ServerError> {
        if !pattern.starts_with('/') {
            return Err(ServerError::InvalidPattern {
                pattern: pattern.to_owned(),
            });
        }
        if self.contains(pattern) {
            return Err(ServerError::DuplicateRoute {
                pattern: pattern.to_owned(),
            });
        }

        // Patterns are literal paths; braces are matchit syntax.
        let literal = pattern.replace('{', "{{").replace('}', "}}");
        let invalid = |err: matchit::InsertError| {
            tracing::debug!(pattern, "rejected route: {err}");
            ServerError::InvalidPattern {
                pattern: pattern.to_owned(),
            }
        };

        // A subtree catch-all never matches its own root, so the root is
        // registered beside it.
        if pattern.ends_with('/') {
            let mut tree = self.tree.clone();
            tree.insert(format!("{literal}{SUBTREE}"), service.clone())
                .map_err(invalid)?;
            tree.insert(literal, service).map_err(invalid)?;
            self.tree = tree;
        } else {
            self.tree.insert(literal, service).map_err(invalid)?;
        }
        self.patterns.insert(pattern.to_owned());
        Ok(())
    }

    fn contains(&self, pattern: &str) -> bool {
        self.patterns.contains(pattern)
    }

    fn route(&self, path: &str) -> Option<&HttpService> {
        self.tree.at(path).ok().map(|matched| matched.value)
    }
}

/// Frozen routing table served as a single [`HttpService`].
#[derive(Clone)]
pub(crate) struct Mux {
    routes: Arc<Routes>,
}

impl Mux {
    pub(crate) fn new(routes: Routes) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }
}

impl Service<Request<Body>> for Mux {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        match self.routes.route(req.uri().path()) {
            Some(service) => Box::pin(service.clone().oneshot(req)),
            None => {
                tracing::debug!(path = req.uri().path(), "no route");
                Box::pin(async { Ok(not_found()) })
            }
        }
    }
}

fn not_found() -> Response<Body> {
    let mut res = Response::new(empty());
    *res.status_mut() = StatusCode::NOT_FOUND;
    res
}
