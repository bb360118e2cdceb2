//! Request construction
//!
//! Resolves everything a call needs before the first attempt: the final URL
//! with team scoping applied, the injected header set, and a body encoded
//! exactly once. Retries replay the prepared form without redoing any of it.

use std::time::Duration;

use airlift_common::retry::RetryPolicy;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::errors::ApiError;

/// User agent identifying this client, sent on every request.
pub(crate) const USER_AGENT: &str = concat!("airlift-client/", env!("CARGO_PKG_VERSION"));

/// Query parameter used to scope a request to a team.
const TEAM_PARAM: &str = "teamId";

/// Request body, either structured or pre-encoded.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON value, encoded once; forces `Content-Type: application/json`.
    Json(serde_json::Value),
    /// Opaque bytes sent as-is; the caller's `Content-Type` is preserved.
    Raw(Vec<u8>),
}

/// Per-request options layered over the client configuration.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method for the request.
    pub method: Method,
    /// Caller-supplied headers; injected headers overwrite clashes.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<RequestBody>,
    /// Append the configured team to the query string (default `true`).
    pub team_scoped: bool,
    /// Decode a JSON response body into a value (default `true`).
    pub decode_json: bool,
    /// Retry policy override; `None` uses the client's default.
    pub retry: Option<RetryPolicy>,
    /// Overall deadline across all attempts and backoff waits.
    pub deadline: Option<Duration>,
    /// Cancellation token observed between and during attempts.
    pub cancel: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            team_scoped: true,
            decode_json: true,
            retry: None,
            deadline: None,
            cancel: None,
        }
    }
}

impl RequestOptions {
    /// Options for the given method with every default applied.
    pub fn new(method: Method) -> Self {
        Self { method, ..Self::default() }
    }

    /// Add a caller header. Injected headers still win on conflict.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a structured body, JSON-encoding it now.
    ///
    /// # Errors
    /// Returns `ApiError::Encode` if the value cannot be represented as JSON.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    /// Attach pre-encoded bytes, leaving headers untouched.
    #[must_use]
    pub fn with_raw_body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Raw(bytes.into()));
        self
    }

    /// Control whether the configured team is appended to the query string.
    #[must_use]
    pub fn with_team_scoping(mut self, enabled: bool) -> Self {
        self.team_scoped = enabled;
        self
    }

    /// Control whether a JSON response body is decoded.
    #[must_use]
    pub fn with_json_decoding(mut self, enabled: bool) -> Self {
        self.decode_json = enabled;
        self
    }

    /// Override the client's retry policy for this request only.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Bound the whole call, backoff waits included.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Observe a cancellation token for the whole call.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A request resolved against the client configuration, ready to replay on
/// every attempt.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Vec<u8>>,
}

impl PreparedRequest {
    /// Resolve `path` and `options` against the configuration.
    ///
    /// # Errors
    /// Returns `ApiError::Config` for an unparseable URL or a token that
    /// cannot be carried in a header, and `ApiError::Encode` for a body that
    /// fails to serialize.
    pub(crate) fn build(
        config: &ClientConfig,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Self, ApiError> {
        let joined = format!("{}{}", config.base_url.as_str().trim_end_matches('/'), path);
        let mut url = Url::parse(&joined)
            .map_err(|e| ApiError::Config(format!("Invalid request URL `{joined}`: {e}")))?;

        // The configured team replaces any caller-supplied teamId. Requests
        // opt out with `with_team_scoping(false)`.
        if options.team_scoped {
            if let Some(team_id) = &config.team_id {
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(name, _)| name != TEAM_PARAM)
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect();
                let mut pairs = url.query_pairs_mut();
                pairs.clear();
                for (name, value) in &kept {
                    pairs.append_pair(name, value);
                }
                pairs.append_pair(TEAM_PARAM, team_id);
            }
        }

        let mut headers = options.headers.clone();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.auth_token))
            .map_err(|_| ApiError::Config("Auth token is not a valid header value".to_string()))?;
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        let body = match &options.body {
            Some(RequestBody::Json(value)) => {
                let bytes =
                    serde_json::to_vec(value).map_err(|e| ApiError::Encode(e.to_string()))?;
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(bytes)
            }
            Some(RequestBody::Raw(bytes)) => Some(bytes.clone()),
            None => None,
        };

        Ok(Self { method: options.method.clone(), url, headers, body })
    }

    /// Start a fresh transport request for one attempt.
    pub(crate) fn to_reqwest(&self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder =
            http.request(self.method.clone(), self.url.clone()).headers(self.headers.clone());
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}
