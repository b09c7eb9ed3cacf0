//! Event envelope passed to every lifecycle hook.
//!
//! An [`Event`] carries exactly one request and, from the origin-response
//! stage onward, one response. The shape mirrors the JSON record an edge
//! function receives: lower-cased header names mapping to ordered
//! `{key, value}` lists, a stage tag and distribution metadata.
use std::{collections::BTreeMap, fmt, str::FromStr};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::core::origin::OriginDescriptor;

/// One of the four fixed hook points in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Request arriving at the edge from the client.
    ViewerRequest,
    /// Request leaving the edge towards the origin.
    OriginRequest,
    /// Response arriving at the edge from the origin.
    OriginResponse,
    /// Response leaving the edge towards the client.
    ViewerResponse,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::ViewerRequest,
        Stage::OriginRequest,
        Stage::OriginResponse,
        Stage::ViewerResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ViewerRequest => "viewer-request",
            Stage::OriginRequest => "origin-request",
            Stage::OriginResponse => "origin-response",
            Stage::ViewerResponse => "viewer-response",
        }
    }

    /// Whether hooks at this stage consume a request (and may short-circuit).
    pub fn is_request_stage(&self) -> bool {
        matches!(self, Stage::ViewerRequest | Stage::OriginRequest)
    }

    /// Direction label used in stage logs.
    pub fn direction(&self) -> &'static str {
        if self.is_request_stage() {
            "request"
        } else {
            "response"
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "viewer-request" => Ok(Stage::ViewerRequest),
            "origin-request" => Ok(Stage::OriginRequest),
            "origin-response" => Ok(Stage::OriginResponse),
            "viewer-response" => Ok(Stage::ViewerResponse),
            other => Err(format!("unknown lifecycle stage '{other}'")),
        }
    }
}

/// A single header value with its original-case key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

/// Multi-valued header map keyed by lower-cased header name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeHeaders(BTreeMap<String, Vec<HeaderEntry>>);

impl EdgeHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(|entry| entry.value.as_str())
    }

    pub fn get_all(&self, name: &str) -> &[HeaderEntry] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Replace every value of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(
            name.to_ascii_lowercase(),
            vec![HeaderEntry {
                key: name.to_string(),
                value: value.into(),
            }],
        );
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(HeaderEntry {
                key: name.to_string(),
                value: value.into(),
            });
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<HeaderEntry>> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate every `(key, value)` pair in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .values()
            .flat_map(|entries| entries.iter())
            .map(|entry| (entry.key.as_str(), entry.value.as_str()))
    }

    pub fn from_http(headers: &http::HeaderMap) -> Self {
        let mut out = Self::new();
        for (name, value) in headers {
            // Non-visible-ASCII values are dropped rather than mangled.
            if let Ok(value) = value.to_str() {
                out.append(name.as_str(), value);
            }
        }
        out
    }

    /// Copy into an `http::HeaderMap`, skipping names or values hyper rejects.
    pub fn to_http(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::new();
        for (key, value) in self.iter() {
            match (
                http::HeaderName::from_bytes(key.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => tracing::warn!("Dropping invalid header {}: {}", key, value),
            }
        }
        map
    }
}

/// How a body string is encoded inside the event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Text,
    Base64,
}

/// Encode raw bytes as `(body, encoding)`, preferring plain text.
pub fn encode_body(bytes: &[u8]) -> (String, BodyEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), BodyEncoding::Text),
        Err(_) => (BASE64.encode(bytes), BodyEncoding::Base64),
    }
}

/// Decode an event body back to bytes.
pub fn decode_body(body: &str, encoding: BodyEncoding) -> Result<Vec<u8>, base64::DecodeError> {
    match encoding {
        BodyEncoding::Text => Ok(body.as_bytes().to_vec()),
        BodyEncoding::Base64 => BASE64.decode(body),
    }
}

/// Request body as seen by hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub data: String,
    pub encoding: BodyEncoding,
}

/// Request half of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub querystring: String,
    #[serde(default)]
    pub headers: EdgeHeaders,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub origin: Option<OriginDescriptor>,
}

impl EdgeRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_querystring(mut self, querystring: impl Into<String>) -> Self {
        self.querystring = querystring.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// URI with the query string re-attached; used as the cache key.
    pub fn uri_with_query(&self) -> String {
        if self.querystring.is_empty() {
            self.uri.clone()
        } else {
            format!("{}?{}", self.uri, self.querystring)
        }
    }

    /// Populate `cookies` from any `cookie` headers.
    pub fn parse_cookies(&mut self) {
        let pairs: Vec<(String, String)> = self
            .headers
            .get_all("cookie")
            .iter()
            .flat_map(|entry| entry.value.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        self.cookies.extend(pairs);
    }
}

/// Response half of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeResponse {
    pub status: u16,
    #[serde(default)]
    pub status_description: String,
    #[serde(default)]
    pub headers: EdgeHeaders,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_encoding: BodyEncoding,
}

impl EdgeResponse {
    pub fn new(status: u16) -> Self {
        let status_description = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_description,
            headers: EdgeHeaders::new(),
            body: String::new(),
            body_encoding: BodyEncoding::Text,
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.body_encoding = BodyEncoding::Text;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_body(&self.body, self.body_encoding)
    }
}

/// Stage tag and distribution metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    pub event_type: Stage,
    pub distribution_id: String,
    pub distribution_domain_name: String,
    pub request_id: String,
}

/// The `{ config, request, response? }` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub config: EventConfig,
    pub request: EdgeRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<EdgeResponse>,
}

impl Event {
    pub fn new(config: EventConfig, request: EdgeRequest) -> Self {
        Self {
            config,
            request,
            response: None,
        }
    }

    /// Re-tag the event for the next stage.
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.config.event_type = stage;
        self
    }
}
