use std::{
    borrow::Cow,
    convert::{TryFrom, TryInto},
    sync::OnceLock,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use http::uri::Authority;
use serde_json::Value;
use uuid::Uuid;

#[cfg(feature = "cookies")]
use headers::{Cookie, HeaderMapExt};

use crate::common::{
    data::Error::{BodyDecodingError, RequestConversionError},
    util::{decode_multipart, multipart_boundary},
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot convert request to internal structure: {0}")]
    RequestConversionError(String),
    #[error("cannot decode body: {0}")]
    BodyDecodingError(String),
    #[error("cannot decode multipart body: {0}")]
    MultipartDecodingError(String),
    #[error("cannot build response: {0}")]
    ResponseConversionError(String),
}

/// A general abstraction of an HTTP request as seen by the matching engine.
///
/// Header names and query/form parameter names are looked up case-insensitively. All values
/// are multi-valued.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<(String, String)>,
    #[serde(default)]
    body: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parts: Option<Vec<RequestPart>>,
    #[serde(skip)]
    decoded_parts: OnceLock<Vec<RequestPart>>,
}

impl HttpRequest {
    /// Creates a request with the given method and URL (path plus optional query string).
    pub fn new<M: Into<String>, U: Into<String>>(method: M, url: U) -> Self {
        Self {
            scheme: "http".to_string(),
            host: None,
            port: None,
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            parts: None,
            decoded_parts: OnceLock::new(),
        }
    }

    pub fn with_scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self.decoded_parts = OnceLock::new();
        self
    }

    /// Supplies already decoded multipart parts. Without them, parts are decoded lazily from a
    /// `multipart/*` body.
    pub fn with_parts(mut self, parts: Vec<RequestPart>) -> Self {
        self.parts = Some(parts);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The full URL as received: path plus query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }

    pub fn query(&self) -> Option<&str> {
        let start = self.url.find('?')? + 1;
        let rest = &self.url[start..];
        let end = rest.find('#').unwrap_or(rest.len());
        Some(&rest[..end])
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host the request was sent to. An explicitly set host wins over the `Host`
    /// header.
    pub fn host(&self) -> Option<String> {
        if let Some(host) = &self.host {
            return Some(host.clone());
        }

        self.host_authority().map(|a| a.host().to_string())
    }

    fn host_authority(&self) -> Option<Authority> {
        self.header_values("host")
            .first()
            .and_then(|h| h.trim().parse::<Authority>().ok())
    }

    /// Returns the port the request was sent to, falling back to the scheme default.
    pub fn port(&self) -> u16 {
        if let Some(port) = self.port {
            return port;
        }

        if let Some(port) = self.host_authority().and_then(|a| a.port_u16()) {
            return port;
        }

        if self.scheme.eq_ignore_ascii_case("https") {
            return 443;
        }

        80
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_values("content-type").into_iter().next()
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        match self.query() {
            None => Vec::new(),
            Some(query) => form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn query_values(&self, name: &str) -> Vec<String> {
        values_named(self.query_params(), name)
    }

    /// Form parameters decoded from an `application/x-www-form-urlencoded` body.
    pub fn form_params(&self) -> Vec<(String, String)> {
        let is_form = self
            .content_type()
            .map(|ct| {
                ct.to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);

        if !is_form {
            return Vec::new();
        }

        form_urlencoded::parse(&self.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn form_values(&self, name: &str) -> Vec<String> {
        values_named(self.form_params(), name)
    }

    #[cfg(feature = "cookies")]
    pub fn cookies(&self) -> Vec<(String, String)> {
        let mut header_map = http::HeaderMap::new();
        for (name, value) in self.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("cookie")) {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                header_map.append(name, value);
            }
        }

        let mut result = Vec::new();
        if let Some(cookie) = header_map.typed_get::<Cookie>() {
            for (key, value) in cookie.iter() {
                result.push((key.to_string(), value.to_string()));
            }
        }

        result
    }

    #[cfg(not(feature = "cookies"))]
    pub fn cookies(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Cookie names are case-sensitive.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Multipart parts of the request. Bodies that are not `multipart/*` or cannot be decoded
    /// yield no parts.
    pub fn parts(&self) -> &[RequestPart] {
        if let Some(parts) = &self.parts {
            return parts;
        }

        self.decoded_parts.get_or_init(|| {
            let boundary = match self.content_type().and_then(multipart_boundary) {
                Some(b) => b,
                None => return Vec::new(),
            };

            decode_multipart(&boundary, &self.body).unwrap_or_else(|err| {
                tracing::warn!("Ignoring undecodable multipart body: {}", err);
                Vec::new()
            })
        })
    }

    /// A one-line description, e.g. `GET /orders?id=1`.
    pub fn summary(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

fn values_named(pairs: Vec<(String, String)>, name: &str) -> Vec<String> {
    pairs
        .into_iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
        .collect()
}

fn http_headers_to_vec<T>(req: &http::Request<T>) -> Result<Vec<(String, String)>, Error> {
    req.headers()
        .iter()
        .map(|(name, value)| {
            let value_str = value
                .to_str()
                .map_err(|e| RequestConversionError(e.to_string()))?;
            Ok((name.as_str().to_string(), value_str.to_string()))
        })
        .collect()
}

impl TryFrom<&http::Request<Bytes>> for HttpRequest {
    type Error = Error;

    fn try_from(value: &http::Request<Bytes>) -> Result<Self, Self::Error> {
        let headers = http_headers_to_vec(value)?;
        let uri = value.uri();

        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut request = HttpRequest::new(value.method().as_str(), url)
            .with_scheme(uri.scheme_str().unwrap_or("http"))
            .with_body(value.body().clone());

        request.headers = headers;

        if let Some(authority) = uri.authority() {
            request.host = Some(authority.host().to_string());
            request.port = authority.port_u16();
        }

        Ok(request)
    }
}

/// A part of a `multipart/*` request body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestPart {
    pub name: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Bytes,
}

impl RequestPart {
    pub fn new<N: Into<String>, B: Into<Bytes>>(name: N, body: B) -> Self {
        Self {
            name: Some(name.into()),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// What a matched stub answers with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_delay_milliseconds: Option<u64>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self::new(default_status())
    }
}

impl ResponseDefinition {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_message: None,
            headers: Vec::new(),
            body: None,
            json_body: None,
            base64_body: None,
            fixed_delay_milliseconds: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json_body(mut self, body: Value) -> Self {
        self.json_body = Some(body);
        self
    }

    pub fn with_base64_body<S: Into<String>>(mut self, body: S) -> Self {
        self.base64_body = Some(body.into());
        self
    }

    pub fn with_fixed_delay(mut self, millis: u64) -> Self {
        self.fixed_delay_milliseconds = Some(millis);
        self
    }

    /// The response body bytes. A literal body wins over a JSON body, which wins over a base64
    /// body.
    pub fn body_bytes(&self) -> Result<Bytes, Error> {
        if let Some(body) = &self.body {
            return Ok(Bytes::from(body.clone()));
        }

        if let Some(json) = &self.json_body {
            let bytes = serde_json::to_vec(json).map_err(|e| BodyDecodingError(e.to_string()))?;
            return Ok(Bytes::from(bytes));
        }

        if let Some(encoded) = &self.base64_body {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| BodyDecodingError(e.to_string()))?;
            return Ok(Bytes::from(bytes));
        }

        Ok(Bytes::new())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubEventKind {
    ScenarioTransition,
    RequestNotMatched,
    Warning,
}

/// Additional information attached to a serve event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubEvent {
    pub kind: SubEventKind,
    pub message: String,
}

impl SubEvent {
    pub fn new<S: Into<String>>(kind: SubEventKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// An immutable record of one served HTTP request.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServeEvent {
    pub id: Uuid,
    pub request: HttpRequest,
    pub stub_id: Option<Uuid>,
    pub response: Option<ResponseDefinition>,
    pub logged_at: DateTime<Utc>,
    #[serde(default)]
    pub sub_events: Vec<SubEvent>,
}

impl ServeEvent {
    pub fn new(
        request: HttpRequest,
        stub_id: Option<Uuid>,
        response: Option<ResponseDefinition>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            stub_id,
            response,
            logged_at: Utc::now(),
            sub_events: Vec::new(),
        }
    }

    pub fn with_sub_event(mut self, sub_event: SubEvent) -> Self {
        self.sub_events.push(sub_event);
        self
    }

    pub fn was_matched(&self) -> bool {
        self.stub_id.is_some()
    }
}

/// An immutable record of one message received on a channel.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageServeEvent {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub body: String,
    pub stub_id: Option<Uuid>,
    #[serde(default)]
    pub deliveries: Vec<Uuid>,
    pub logged_at: DateTime<Utc>,
    #[serde(default)]
    pub sub_events: Vec<SubEvent>,
}

impl MessageServeEvent {
    pub fn new(
        channel_id: Uuid,
        body: String,
        stub_id: Option<Uuid>,
        deliveries: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id,
            body,
            stub_id,
            deliveries,
            logged_at: Utc::now(),
            sub_events: Vec::new(),
        }
    }

    pub fn with_sub_event(mut self, sub_event: SubEvent) -> Self {
        self.sub_events.push(sub_event);
        self
    }

    pub fn was_matched(&self) -> bool {
        self.stub_id.is_some()
    }
}

/// One field-by-field line of a near miss diff.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub field: String,
    pub operator: String,
    pub expected: String,
    pub actual: Option<String>,
    pub distance: f64,
    pub is_exact_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffResult>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Diff {
    Same(String),
    Add(String),
    Rem(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiffResult {
    pub differences: Vec<Diff>,
    pub distance: f32,
    pub tokenizer: Tokenizer,
}

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Copy)]
pub enum Tokenizer {
    Line,
    Word,
    Character,
}

impl TryInto<http::Response<Bytes>> for &ResponseDefinition {
    type Error = Error;

    fn try_into(self) -> Result<http::Response<Bytes>, Self::Error> {
        let mut builder = http::Response::builder().status(self.status);

        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        let has_content_type = self
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));

        if self.json_body.is_some() && self.body.is_none() && !has_content_type {
            builder = builder.header("content-type", "application/json");
        }

        builder
            .body(self.body_bytes()?)
            .map_err(|e| Error::ResponseConversionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let req = HttpRequest::new("get", "/orders/1?expand=items&expand=customer#frag");

        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/orders/1");
        assert_eq!(req.query(), Some("expand=items&expand=customer"));
        assert_eq!(req.query_values("EXPAND"), vec!["items", "customer"]);
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_multi_valued() {
        let req = HttpRequest::new("GET", "/")
            .with_header("Accept", "text/plain")
            .with_header("accept", "application/json");

        assert_eq!(req.header_values("ACCEPT"), vec!["text/plain", "application/json"]);
        assert!(req.header_values("x-missing").is_empty());
    }

    #[test]
    fn host_and_port_come_from_host_header() {
        let req = HttpRequest::new("GET", "/").with_header("Host", "example.com:8080");
        assert_eq!(req.host().as_deref(), Some("example.com"));
        assert_eq!(req.port(), 8080);

        let req = HttpRequest::new("GET", "/").with_scheme("https");
        assert_eq!(req.port(), 443);
    }

    #[test]
    fn ipv6_host_headers_keep_the_whole_address() {
        let req = HttpRequest::new("GET", "/").with_header("Host", "[::1]:8080");
        assert_eq!(req.host().as_deref(), Some("[::1]"));
        assert_eq!(req.port(), 8080);

        let req = HttpRequest::new("GET", "/").with_header("Host", "[2001:db8::7]");
        assert_eq!(req.host().as_deref(), Some("[2001:db8::7]"));
        assert_eq!(req.port(), 80);
    }

    #[test]
    fn form_params_require_form_content_type() {
        let req = HttpRequest::new("POST", "/login")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("user=ann&pass=a%20b");
        assert_eq!(req.form_values("pass"), vec!["a b"]);

        let req = HttpRequest::new("POST", "/login").with_body("user=ann");
        assert!(req.form_params().is_empty());
    }

    #[cfg(feature = "cookies")]
    #[test]
    fn parses_cookies() {
        let req = HttpRequest::new("GET", "/").with_header("Cookie", "session=abc; theme=dark");
        assert_eq!(req.cookie_value("theme").as_deref(), Some("dark"));
        assert_eq!(req.cookie_value("Theme"), None);
    }

    #[test]
    fn response_body_precedence() {
        let res = ResponseDefinition::ok().with_base64_body("aGVsbG8=");
        assert_eq!(res.body_bytes().unwrap(), Bytes::from("hello"));

        let res = ResponseDefinition::ok()
            .with_json_body(serde_json::json!({"a": 1}))
            .with_body("plain");
        assert_eq!(res.body_bytes().unwrap(), Bytes::from("plain"));
    }

    #[test]
    fn converts_from_http_request() {
        let http_req = http::Request::builder()
            .method("PUT")
            .uri("http://localhost:9000/a/b?x=1")
            .header("X-Token", "t")
            .body(Bytes::from("payload"))
            .unwrap();

        let req: HttpRequest = (&http_req).try_into().unwrap();
        assert_eq!(req.method(), "PUT");
        assert_eq!(req.url(), "/a/b?x=1");
        assert_eq!(req.host().as_deref(), Some("localhost"));
        assert_eq!(req.port(), 9000);
        assert_eq!(req.header_values("x-token"), vec!["t"]);
        assert_eq!(req.body_str(), "payload");
    }
}
