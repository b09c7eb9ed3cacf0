use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tracing::Instrument;

use crate::{
    core::{
        error::EdgeError,
        event::{EdgeHeaders, EdgeRequest, EdgeResponse, RequestBody, encode_body},
        router::Router,
    },
    tracing_setup::create_request_span,
};

/// Method that empties the edge cache instead of being routed.
pub const PURGE_METHOD: &str = "PURGE";

/// HTTP boundary of the emulator: wire requests in, edge responses out.
pub struct HttpHandler {
    router: Arc<Router>,
}

impl HttpHandler {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Handle one request; every failure is rendered as a JSON error response.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
        let started = Instant::now();

        let response = async {
            tracing::info!("Handling {} request to {}", req.method(), req.uri());

            let result = if req.method().as_str() == PURGE_METHOD {
                self.handle_purge().await
            } else {
                match Self::to_edge_request(req, client_addr).await {
                    Ok(request) => self.router.handle(request).await,
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(response) => {
                    if let Some(cache) = response.headers.get(crate::core::lifecycle::X_CACHE) {
                        tracing::Span::current().record("cache", cache);
                    }
                    Self::to_http_response(response)
                }
                Err(e) => {
                    tracing::warn!("Request failed: {}", e);
                    Self::error_response(&e)
                }
            }
        }
        .instrument(span.clone())
        .await;

        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", started.elapsed().as_millis() as u64);
        response
    }

    async fn handle_purge(&self) -> Result<EdgeResponse, EdgeError> {
        self.router.purge().await?;
        tracing::info!("Edge cache purged");
        Ok(EdgeResponse::new(200))
    }

    /// Convert a wire request into the event's request shape.
    pub async fn to_edge_request(
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<EdgeRequest, EdgeError> {
        let (parts, body) = req.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| EdgeError::InternalServerError(format!("Failed to read request body: {e}")))?
            .to_bytes();

        let mut request = EdgeRequest::new(parts.method.as_str(), parts.uri.path());
        request.querystring = parts.uri.query().unwrap_or_default().to_string();
        request.headers = EdgeHeaders::from_http(&parts.headers);
        request.client_ip = client_ip(&parts.headers, client_addr);
        if !bytes.is_empty() {
            let (data, encoding) = encode_body(&bytes);
            request.body = Some(RequestBody { data, encoding });
        }
        request.parse_cookies();
        Ok(request)
    }

    /// Convert the final edge response back into an HTTP response.
    pub fn to_http_response(response: EdgeResponse) -> Response<AxumBody> {
        let body = match response.body_bytes() {
            Ok(body) => body,
            Err(e) => {
                return Self::error_response(&EdgeError::InternalServerError(format!(
                    "Response body is not valid base64: {e}"
                )));
            }
        };
        let Ok(status) = StatusCode::from_u16(response.status) else {
            return Self::error_response(&EdgeError::InternalServerError(format!(
                "Invalid response status {}",
                response.status
            )));
        };

        let mut headers = response.headers.to_http();
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);

        let mut http_response = Response::new(AxumBody::from(Bytes::from(body)));
        *http_response.status_mut() = status;
        *http_response.headers_mut() = headers;
        http_response
    }

    /// Render an error as `{code, message}` with its status.
    pub fn error_response(error: &EdgeError) -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::from(error.to_body().to_string()));
        *response.status_mut() = error.status_code();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_ip(headers: &HeaderMap, client_addr: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| client_addr.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}
