//! Wire request/response model and the transport seam
//!
//! [`AuthRequest`] is a transient value describing one authorization-server
//! round trip; [`Response`] wraps whatever came back. The actual HTTP call
//! goes through the [`RequestPerformer`] trait so the engine never touches a
//! socket directly — tests script responses, applications inject the
//! `reqwest`-backed [`HttpPerformer`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::error::{Error, Result};
use crate::params::RequestParams;

/// A decoded JSON token response: string keys to arbitrary values.
pub type TokenJson = serde_json::Map<String, serde_json::Value>;

/// HTTP method of an [`AuthRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A single request against an authorization server.
///
/// Built by the flows, converted to a query URL (GET) or a form body (POST),
/// executed once through a [`RequestPerformer`], and discarded.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    url: String,
    method: HttpMethod,
    params: RequestParams,
    headers: Vec<(String, String)>,
}

impl AuthRequest {
    /// Create a POST request (token endpoints).
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self { url: url.into(), method: HttpMethod::Post, params: RequestParams::new(), headers: Vec::new() }
    }

    /// Create a GET request (metadata discovery).
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), method: HttpMethod::Get, params: RequestParams::new(), headers: Vec::new() }
    }

    /// Replace the parameter set.
    #[must_use]
    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    /// Attach an HTTP Basic `Authorization` header for confidential clients.
    ///
    /// Client id and secret are form-encoded before concatenation per
    /// RFC 6749 §2.3.1.
    #[must_use]
    pub fn with_basic_auth(mut self, client_id: &str, client_secret: &str) -> Self {
        let credentials = format!(
            "{}:{}",
            urlencoding::encode(client_id),
            urlencoding::encode(client_secret)
        );
        self.headers
            .push(("Authorization".to_string(), format!("Basic {}", STANDARD.encode(credentials))));
        self
    }

    /// Target URL without parameters.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The ordered parameter set.
    #[must_use]
    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    /// Extra headers (currently only `Authorization`).
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Full URL with parameters appended as a query string.
    #[must_use]
    pub fn as_url(&self) -> String {
        if self.params.is_empty() {
            self.url.clone()
        } else {
            let sep = if self.url.contains('?') { '&' } else { '?' };
            format!("{}{sep}{}", self.url, self.params.to_query_string())
        }
    }

    /// Form-encoded request body for POST requests.
    #[must_use]
    pub fn body(&self) -> String {
        self.params.to_query_string()
    }
}

/// Raw result of one authorization-server round trip: status, headers, and
/// body bytes.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

impl Response {
    /// Wrap a status and body, with no headers.
    #[must_use]
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body, headers: Vec::new() }
    }

    /// Attach the response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Raw response bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Response headers as name/value pairs, in arrival order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Decode the body as a JSON object.
    ///
    /// # Errors
    /// [`Error::NoDataInResponse`] for an empty body, [`Error::JsonParse`]
    /// for anything that is not a JSON object.
    pub fn json(&self) -> Result<TokenJson> {
        if self.body.is_empty() {
            return Err(Error::NoDataInResponse);
        }
        let value: serde_json::Value = serde_json::from_slice(&self.body)?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(Error::JsonParse(format!("expected JSON object, got {other}"))),
        }
    }

    /// Decode the body as a token response, mapping server errors to the
    /// crate taxonomy.
    ///
    /// An `error` field in the body takes precedence over the HTTP status;
    /// otherwise 401 maps to [`Error::UnauthorizedClient`], 403 to
    /// [`Error::Forbidden`], and any other 4xx/5xx to [`Error::Response`].
    ///
    /// # Errors
    /// See above; also the decoding errors of [`Response::json`].
    pub fn token_json(&self) -> Result<TokenJson> {
        let json = match self.json() {
            Ok(json) => json,
            // A failing status with an undecodable body is still a failure.
            Err(e) if self.status < 400 => return Err(e),
            Err(_) => {
                return Err(self.status_error(String::from_utf8_lossy(&self.body).into_owned()))
            }
        };

        if let Some(code) = json.get("error").and_then(|v| v.as_str()) {
            let description = json
                .get("error_description")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned);
            debug!(code, "authorization server reported an error");
            return Err(Error::from_server_code(code, description));
        }

        if self.status >= 400 {
            return Err(self.status_error(format!("HTTP {}", self.status)));
        }

        Ok(json)
    }

    fn status_error(&self, message: String) -> Error {
        match self.status {
            401 => Error::UnauthorizedClient(Some(message)),
            403 => Error::Forbidden(Some(message)),
            status => Error::Response { status, message },
        }
    }
}

/// Check the `token_type` of a token response.
///
/// Only `bearer` tokens are supported; the comparison is case-insensitive per
/// RFC 6749 §5.1.
///
/// # Errors
/// [`Error::NoTokenType`] when the field is absent,
/// [`Error::UnsupportedTokenType`] for anything but `bearer`.
pub fn validate_token_type(json: &TokenJson) -> Result<()> {
    let token_type = json
        .get("token_type")
        .and_then(|v| v.as_str())
        .ok_or(Error::NoTokenType)?;
    if token_type.eq_ignore_ascii_case("bearer") {
        Ok(())
    } else {
        Err(Error::UnsupportedTokenType(token_type.to_string()))
    }
}

/// Transport seam: performs one [`AuthRequest`] and returns the raw response.
///
/// Transport-level failures must be reported as [`Error::Network`]; HTTP
/// error statuses are returned as a normal [`Response`] so the caller can map
/// the body.
#[async_trait]
pub trait RequestPerformer: Send + Sync {
    /// Execute the request, suspending until a response or transport error.
    async fn perform(&self, request: AuthRequest) -> Result<Response>;
}

/// Default `reqwest`-backed performer.
#[derive(Debug, Clone)]
pub struct HttpPerformer {
    client: reqwest::Client,
}

impl HttpPerformer {
    /// Create a performer with a 30 second request timeout.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Wrap an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpPerformer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestPerformer for HttpPerformer {
    async fn perform(&self, request: AuthRequest) -> Result<Response> {
        let mut builder = match request.method() {
            HttpMethod::Get => self.client.get(request.as_url()),
            HttpMethod::Post => self
                .client
                .post(request.url())
                .header("Content-Type", "application/x-www-form-urlencoded; charset=utf-8")
                .body(request.body()),
        };
        builder = builder.header("Accept", "application/json");
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        let body = response.bytes().await.map_err(|e| Error::Network(e.to_string()))?;
        Ok(Response::new(status, body.to_vec()).with_headers(headers))
    }
}
