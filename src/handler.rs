//! Request handler registry.
//!
//! A [`Router`] maps request paths to async handlers. The reader asks it to
//! start one handler task per parsed request; the task's join handle rides
//! through the pipeline alongside the request.

use crate::request::Request;
use crate::response::Response;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;
type HandlerFn = Box<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Path-based handler registry.
///
/// # Examples
///
/// ```
/// use esteira::{Response, Router, StatusCode};
///
/// let router = Router::new()
///     .route("/ping", |_req| async { Response::with_body(StatusCode::Ok, "pong") });
/// ```
pub struct Router {
    routes: HashMap<String, HandlerFn>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Registers `handler` for requests whose path equals `path`.
    ///
    /// The handler runs on its own task; a panicking handler is reported to
    /// the peer as a `500` without affecting other requests.
    pub fn route<F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.routes
            .insert(path.into(), Box::new(move |req| Box::pin(handler(req))));
        self
    }

    /// Spawns the handler task for `request` and returns its join handle.
    ///
    /// The handle is awaited by the connection's writer, never here.
    pub(crate) fn start_request_task(self: &Arc<Self>, request: Request) -> JoinHandle<Response> {
        let router = Arc::clone(self);
        tokio::spawn(async move { router.dispatch(request).await })
    }

    async fn dispatch(&self, request: Request) -> Response {
        match self.routes.get(request.path()) {
            Some(handler) => handler(request).await,
            None => {
                debug!(path = %request.path(), "no handler registered");
                Response::not_found()
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, Version};
    use crate::response::StatusCode;
    use bytes::Bytes;

    fn request(target: &str) -> Request {
        Request::new(
            Method::Get,
            target.to_string(),
            Version::Http11,
            Vec::new(),
            Bytes::new(),
        )
    }

    #[tokio::test]
    async fn dispatches_by_path_ignoring_query() {
        let router = Arc::new(
            Router::new()
                .route("/echo", |req: Request| async move {
                    Response::with_body(StatusCode::Ok, req.query().unwrap_or("").to_string())
                }),
        );

        let response = router
            .start_request_task(request("/echo?msg=hi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(&response.body()[..], b"msg=hi");
    }

    #[tokio::test]
    async fn unknown_path_is_a_404() {
        let router = Arc::new(Router::new());
        let response = router
            .start_request_task(request("/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn panicking_handler_surfaces_as_join_error() {
        let router =
            Arc::new(Router::new().route("/crash", |_req| async { panic!("handler blew up") }));

        let err = router
            .start_request_task(request("/crash"))
            .await
            .unwrap_err();
        assert!(err.is_panic());
    }
}
