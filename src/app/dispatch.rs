use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, Limited};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::AppServices;
use crate::context::{ContextPool, HandlerChain, Request};
use crate::error::CtxError;
use crate::writer::{ChannelReceiver, ChannelStream, body_stream};

/// Per-route state captured by the axum handler.
pub(crate) struct RouteSlot {
    name: String,
    pool: ContextPool,
    services: Arc<AppServices>,
}

impl RouteSlot {
    pub(crate) fn new(name: String, handlers: HandlerChain, services: Arc<AppServices>) -> Self {
        let capacity = services.config().server.pool_capacity;
        Self {
            name,
            pool: ContextPool::new(handlers, Arc::clone(&services), capacity),
            services,
        }
    }

    /// Run the chain for one request. Blocking: call from a blocking thread.
    ///
    /// A handler error is returned only when nothing was sent yet, so the
    /// caller can still answer with an error response. Session changes made
    /// before the failure are kept; deferred steps are dropped.
    fn serve(
        &self,
        request: Arc<Request>,
        stream: ChannelStream,
        params: Vec<(String, String)>,
    ) -> Result<(), CtxError> {
        let metrics = self.services.metrics();
        let mut ctx = self.pool.get(request, Box::new(stream), params);

        let result = match ctx.next() {
            Err(err) if !ctx.writer().written() => {
                metrics.handler_failed();
                if err.is_fatal() {
                    error!(route = %self.name, error = %err, "Fatal handler error");
                } else {
                    warn!(route = %self.name, error = %err, "Handler failed");
                }
                if let Err(release) = ctx.release_session() {
                    warn!(route = %self.name, error = %release, "Failed to release session");
                }
                Err(err)
            }
            outcome => {
                if let Err(err) = outcome {
                    metrics.handler_failed();
                    error!(route = %self.name, error = %err, "Handler failed after the response was committed");
                }
                if let Err(err) = ctx.release() {
                    warn!(route = %self.name, error = %err, "Failed to release context");
                }
                debug!(
                    route = %self.name,
                    status = %ctx.writer().status(),
                    size = ctx.writer().size(),
                    "Request served"
                );
                Ok(())
            }
        };

        metrics.request_served();
        // Dropping the stream here closes the response channels
        self.pool.put(ctx);
        result
    }
}

pub(crate) async fn dispatch(
    slot: Arc<RouteSlot>,
    params: Vec<(String, String)>,
    request: axum::extract::Request,
) -> Response {
    let server = &slot.services.config().server;
    let limit = server.max_upload.as_usize();
    let (capacity, buffer) = (server.stream_capacity, server.stream_buffer.as_usize());

    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(route = %slot.name, error = %err, limit, "Rejected request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    let request = Arc::new(Request::from_parts(parts, body));

    let (stream, receiver) = ChannelStream::new(capacity, buffer);
    let ChannelReceiver { head, body } = receiver;

    let worker = {
        let slot = Arc::clone(&slot);
        tokio::task::spawn_blocking(move || slot.serve(request, stream, params))
    };

    match head.await {
        Ok(head) => {
            let mut response = Response::new(Body::from_stream(body_stream(body)));
            *response.status_mut() = head.status;
            *response.headers_mut() = head.headers;
            response
        }
        Err(_) => match worker.await {
            Ok(Err(err)) => err.into_response(),
            Ok(Ok(())) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Err(join) => {
                slot.services.metrics().handler_failed();
                error!(route = %slot.name, error = %join, "Handler chain panicked");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}
