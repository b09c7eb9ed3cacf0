use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Method, Request, header};

use crate::{
    core::{
        error::{EdgeError, EdgeResult},
        event::{EdgeHeaders, EdgeRequest, EdgeResponse, decode_body, encode_body},
        origin::{OriginDescriptor, OriginKind},
    },
    ports::{
        http_client::HttpClient,
        origin::{Origin, OriginFactory},
    },
};

/// Headers that describe the client connection rather than the resource.
const FRAMING_HEADERS: [&str; 7] = [
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "te",
];

/// Content type reported for every HTTP origin response, whatever the upstream sent.
pub const HTTP_ORIGIN_CONTENT_TYPE: &str = "application/json";

/// Resolves request URIs against a remote HTTP(S) base or a local directory.
pub struct OriginResolver {
    kind: OriginKind,
    base: Option<String>,
    descriptor: Option<OriginDescriptor>,
    http_client: Arc<dyn HttpClient>,
}

impl OriginResolver {
    pub fn new(
        descriptor: Option<OriginDescriptor>,
        base: Option<String>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        let base = base.filter(|b| !b.trim().is_empty());
        Self {
            kind: OriginKind::classify(base.as_deref()),
            base,
            descriptor,
            http_client,
        }
    }

    async fn resolve(&self, request: &EdgeRequest) -> EdgeResult<EdgeResponse> {
        match (self.kind, self.base.as_deref()) {
            (OriginKind::None, _) => Err(EdgeError::NotFound(format!(
                "No origin configured for {}",
                request.uri
            ))),
            (OriginKind::File, Some(base)) => self.fetch_file(base, request).await,
            (OriginKind::Http | OriginKind::Https, Some(base)) => {
                self.fetch_http(base, request).await
            }
            (kind, None) => Err(EdgeError::InternalServerError(format!(
                "Origin of type {kind} has no base location"
            ))),
        }
    }

    /// Map a request URI onto a path under `base`, refusing anything that climbs out.
    fn file_target(base: &str, uri: &str) -> EdgeResult<PathBuf> {
        let path = uri.split_once('?').map_or(uri, |(path, _)| path);
        let decoded = urlencoding::decode(path)
            .map_err(|_| EdgeError::NotFound(format!("File not found: {path}")))?;
        let relative = Path::new(decoded.trim_start_matches('/'));

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EdgeError::NotFound(format!("File not found: {decoded}")));
        }

        Ok(Path::new(base).join(relative))
    }

    async fn fetch_file(&self, base: &str, request: &EdgeRequest) -> EdgeResult<EdgeResponse> {
        let target = Self::file_target(base, &request.uri)?;
        let not_found = || EdgeError::NotFound(format!("File not found: {}", target.display()));

        match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => {
                return Err(EdgeError::InternalServerError(format!(
                    "Failed to stat {}: {e}",
                    target.display()
                )));
            }
        }

        let bytes = tokio::fs::read(&target).await.map_err(|e| {
            EdgeError::InternalServerError(format!("Failed to read {}: {e}", target.display()))
        })?;
        let (body, encoding) = encode_body(&bytes);
        let content_type = mime_guess::from_path(&target).first_or_octet_stream();

        tracing::debug!("Served {} ({} bytes) from file origin", target.display(), bytes.len());

        let mut response = EdgeResponse::new(200).with_header("Content-Type", content_type.as_ref());
        response.body = body;
        response.body_encoding = encoding;
        Ok(response)
    }

    /// Build the outbound request for an HTTP(S) origin.
    fn origin_request(&self, base: &str, request: &EdgeRequest) -> EdgeResult<Request<AxumBody>> {
        let origin_path = self
            .descriptor
            .as_ref()
            .map(|d| d.origin_path.trim_end_matches('/'))
            .unwrap_or_default();
        let mut url = format!("{}{}{}", base.trim_end_matches('/'), origin_path, request.uri);
        if !request.querystring.is_empty() {
            url.push('?');
            url.push_str(&request.querystring);
        }

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| EdgeError::InternalServerError(format!("Invalid method: {e}")))?;

        let mut forwarded = EdgeHeaders::new();
        for (key, value) in request.headers.iter() {
            if !FRAMING_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
                forwarded.append(key, value);
            }
        }
        if let Some(descriptor) = &self.descriptor {
            for (key, value) in &descriptor.custom_headers {
                forwarded.set(key, value.clone());
            }
        }
        forwarded.set("Connection", "close");

        let body = match &request.body {
            Some(body) => decode_body(&body.data, body.encoding).map_err(|e| {
                EdgeError::InternalServerError(format!("Invalid request body encoding: {e}"))
            })?,
            None => Vec::new(),
        };

        let mut outgoing = Request::builder()
            .method(method)
            .uri(&url)
            .body(AxumBody::from(body))
            .map_err(|e| EdgeError::InternalServerError(format!("Invalid origin URL {url}: {e}")))?;
        *outgoing.headers_mut() = forwarded.to_http();
        Ok(outgoing)
    }

    async fn fetch_http(&self, base: &str, request: &EdgeRequest) -> EdgeResult<EdgeResponse> {
        let outgoing = self.origin_request(base, request)?;
        let upstream = self
            .http_client
            .send_request(outgoing)
            .await
            .map_err(|e| EdgeError::InternalServerError(e.to_string()))?;

        let (parts, body) = upstream.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| EdgeError::InternalServerError(format!("Failed to read origin body: {e}")))?
            .to_bytes();

        tracing::debug!(
            "Origin answered {} with {} bytes",
            parts.status,
            bytes.len()
        );

        let mut headers = EdgeHeaders::from_http(&parts.headers);
        for name in FRAMING_HEADERS {
            headers.remove(name);
        }
        headers.set(header::CONTENT_TYPE.as_str(), HTTP_ORIGIN_CONTENT_TYPE);

        let (body, body_encoding) = encode_body(&bytes);
        let mut response = EdgeResponse::new(200);
        response.headers = headers;
        response.body = body;
        response.body_encoding = body_encoding;
        Ok(response)
    }
}

#[async_trait]
impl Origin for OriginResolver {
    fn kind(&self) -> OriginKind {
        self.kind
    }

    fn descriptor(&self) -> Option<&OriginDescriptor> {
        self.descriptor.as_ref()
    }

    async fn fetch(&self, request: &EdgeRequest) -> EdgeResponse {
        match self.resolve(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Origin {} failed for {}: {}", self.kind, request.uri, e);
                e.into_response()
            }
        }
    }
}

/// Creates [`OriginResolver`]s sharing one HTTP client.
#[derive(Clone)]
pub struct OriginResolverFactory {
    http_client: Arc<dyn HttpClient>,
}

impl OriginResolverFactory {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }
}

impl OriginFactory for OriginResolverFactory {
    fn create(
        &self,
        descriptor: Option<OriginDescriptor>,
        base: Option<String>,
    ) -> Arc<dyn Origin> {
        Arc::new(OriginResolver::new(
            descriptor,
            base,
            self.http_client.clone(),
        ))
    }
}
