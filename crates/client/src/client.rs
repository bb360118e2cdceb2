//! API client with retry and team scoping
//!
//! Drives prepared requests through the retry loop, classifies every
//! failure as transient or definitive, and decodes what comes back.

use std::future::Future;
use std::time::{Duration, Instant};

use airlift_common::retry::{self, Attempt, RetryError, RetryPolicy};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::errors::ApiError;
use crate::request::{PreparedRequest, RequestOptions};
use crate::response::{error_detail, read_success, ApiResponse};

/// HTTP client for the platform API.
///
/// Holds nothing mutable: the configuration and default retry policy are
/// fixed at construction, and every call builds its own request state, so a
/// single client can be cloned, shared, and reused freely.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client with the default retry policy.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the HTTP transport cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        Self::with_retry(config, RetryPolicy::default())
    }

    /// Create a client with an explicit default retry policy.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the HTTP transport cannot be built.
    pub fn with_retry(config: ClientConfig, retry: RetryPolicy) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, retry })
    }

    /// Create a client from `AIRLIFT_*` environment variables.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if required variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Execute a request against an API path.
    ///
    /// The path is appended to the configured base URL and may carry its own
    /// query string. Transient failures are retried per the request's policy
    /// (falling back to the client default); 4xx responses and decode
    /// failures are surfaced immediately.
    ///
    /// # Errors
    /// See [`ApiError`] for the full taxonomy.
    #[instrument(skip(self, options), fields(method = %options.method, path = %path))]
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let prepared = PreparedRequest::build(&self.config, path, &options)?;
        let policy = options.retry.clone().unwrap_or_else(|| self.retry.clone());
        let decode_json = options.decode_json;
        let deadline = options.deadline;
        let cancel = options.cancel.clone();
        let debug_enabled = self.config.debug;

        if debug_enabled {
            debug!(url = %prepared.url, "dispatching request");
        }

        let attempts = retry::run(&policy, |attempt| {
            let request = prepared.to_reqwest(&self.http);
            async move {
                let started = Instant::now();
                let outcome = self.attempt_once(request, decode_json).await;
                if debug_enabled {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    match &outcome {
                        Attempt::Success(response) => {
                            debug!(attempt, elapsed_ms, status = response.status(), "attempt ok");
                        }
                        Attempt::Retry(error) => {
                            debug!(attempt, elapsed_ms, error = %error, "attempt failed");
                        }
                        Attempt::Abort(error) => {
                            debug!(attempt, elapsed_ms, error = %error, "attempt rejected");
                        }
                    }
                }
                outcome
            }
        });

        bounded(attempts, deadline, cancel).await
    }

    /// GET a path and decode the JSON response.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body does not fit `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(path, RequestOptions::default()).await?.decode()
    }

    /// POST a JSON body to a path and decode the JSON response.
    ///
    /// # Errors
    /// Returns an error if the body cannot be encoded, the request fails, or
    /// the response does not fit `R`.
    pub async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ApiError> {
        let options = RequestOptions::new(Method::POST).with_json(body)?;
        self.request(path, options).await?.decode()
    }

    /// DELETE a path, returning whatever the platform answers with.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.request(path, RequestOptions::new(Method::DELETE)).await
    }

    /// Send one attempt and classify the outcome.
    ///
    /// 4xx responses abort, anything else non-success retries, transport
    /// errors retry only when the failure mode is transient.
    async fn attempt_once(
        &self,
        request: reqwest::RequestBuilder,
        decode_json: bool,
    ) -> Attempt<ApiResponse, ApiError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let transient = err.is_timeout() || err.is_connect() || err.is_request();
                let error = ApiError::Network(err.to_string());
                return if transient { Attempt::Retry(error) } else { Attempt::Abort(error) };
            }
        };

        let status = response.status();
        if status.is_success() {
            return match read_success(response, decode_json).await {
                Ok(api_response) => Attempt::Success(api_response),
                Err(err) if err.should_retry() => Attempt::Retry(err),
                Err(err) => Attempt::Abort(err),
            };
        }

        let code = status.as_u16();
        let body = response.bytes().await.unwrap_or_default();
        let detail = error_detail(code, &body);
        if status.is_client_error() {
            Attempt::Abort(ApiError::Rejected { status: code, detail })
        } else {
            Attempt::Retry(ApiError::Server { status: code, detail })
        }
    }
}

/// Bound the whole attempt loop by the caller's deadline and cancellation
/// token. Both cover backoff waits as well as in-flight attempts.
async fn bounded<F>(
    attempts: F,
    deadline: Option<Duration>,
    cancel: Option<CancellationToken>,
) -> Result<ApiResponse, ApiError>
where
    F: Future<Output = Result<ApiResponse, RetryError<ApiError>>>,
{
    let limited = async move {
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, attempts).await {
                Ok(result) => result.map_err(ApiError::from),
                Err(_) => Err(ApiError::DeadlineExceeded { limit }),
            },
            None => attempts.await.map_err(ApiError::from),
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(ApiError::Cancelled),
                result = limited => result,
            }
        }
        None => limited.await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use airlift_common::retry::Jitter;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::request::USER_AGENT;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        email: String,
    }

    #[derive(Debug, Serialize)]
    struct CreateDeployment {
        name: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Deployment {
        uid: String,
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter: Jitter::None,
        }
    }

    fn client_for(server: &MockServer) -> ApiClient {
        let config = ClientConfig::new(&server.uri(), "tok_test").unwrap();
        ApiClient::with_retry(config, fast_policy(3)).unwrap()
    }

    fn team_client_for(server: &MockServer) -> ApiClient {
        let config = ClientConfig::new(&server.uri(), "tok_test").unwrap().with_team("team_123");
        ApiClient::with_retry(config, fast_policy(3)).unwrap()
    }

    /// Validates `ApiClient::new` behavior for the config access scenario.
    ///
    /// Assertions:
    /// - Confirms `client.config().base_url` survives construction intact.
    /// - Confirms `client.config().team_id` equals the configured team.
    #[test]
    fn test_client_config_access() {
        let config =
            ClientConfig::new("https://api.example.com", "tok_test").unwrap().with_team("team_123");
        let client = ApiClient::new(config).unwrap();

        assert_eq!(client.config().base_url.as_str(), "https://api.example.com/");
        assert_eq!(client.config().team_id.as_deref(), Some("team_123"));
    }

    /// Validates that every request carries the injected header set.
    ///
    /// Assertions:
    /// - Confirms the bearer token, accept, and user-agent headers reach the
    ///   wire; the mock only matches when all three are present.
    #[tokio::test]
    async fn test_get_sends_injected_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/user"))
            .and(header("Authorization", "Bearer tok_test"))
            .and(header("accept", "application/json"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"email": "dev@example.com"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let user: User = client.get("/v2/user").await.unwrap();

        assert_eq!(user, User { email: "dev@example.com".to_string() });
    }

    #[tokio::test]
    async fn test_team_id_reaches_the_wire() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/deployments"))
            .and(query_param("limit", "5"))
            .and(query_param("teamId", "team_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "a@b.c"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = team_client_for(&server);
        let result: Result<User, _> = client.get("/v2/deployments?limit=5").await;

        assert!(result.is_ok());
    }

    /// Validates team scoping when the caller supplied its own team.
    ///
    /// Assertions:
    /// - Confirms the configured team replaces the caller's value on the
    ///   wire; the mock only matches the configured one.
    #[tokio::test]
    async fn test_configured_team_overwrites_caller_team() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/deployments"))
            .and(query_param("teamId", "team_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "a@b.c"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = team_client_for(&server);
        let result: Result<User, _> = client.get("/v2/deployments?teamId=team_mine").await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/deployments"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"name": "my-app"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uid": "dpl_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let deployment: Deployment = client
            .post("/v2/deployments", &CreateDeployment { name: "my-app".to_string() })
            .await
            .unwrap();

        assert_eq!(deployment, Deployment { uid: "dpl_1".to_string() });
    }

    /// Validates the 4xx path for the single-attempt scenario.
    ///
    /// Assertions:
    /// - Confirms a 404 is surfaced as a rejection with the platform's
    ///   message and code.
    /// - Confirms exactly one request was sent; rejections never retry.
    #[tokio::test]
    async fn test_404_fails_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/deployments/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"error": {"message": "deployment not found", "code": "not_found"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.request("/v2/deployments/missing", RequestOptions::default()).await;

        match result {
            Err(ApiError::Rejected { status, detail }) => {
                assert_eq!(status, 404);
                assert_eq!(detail.message, "deployment not found");
                assert_eq!(detail.code.as_deref(), Some("not_found"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    /// Validates the transient path for the recover-before-exhaustion
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms two 503 responses are retried and the third attempt's 200
    ///   is returned.
    /// - Confirms exactly three requests were sent.
    #[tokio::test]
    async fn test_503_retries_until_success() {
        let server = MockServer::start().await;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        Mock::given(method("GET"))
            .and(path("/v2/flaky"))
            .respond_with(move |_: &Request| {
                if hits_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                        .set_body_json(json!({"error": {"message": "unavailable"}}))
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"email": "a@b.c"}))
                }
            })
            .mount(&server)
            .await;

        let client = client_for(&server);
        let user: User = client.get("/v2/flaky").await.unwrap();

        assert_eq!(user.email, "a@b.c");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    /// Validates exhaustion for the always-failing scenario.
    ///
    /// Assertions:
    /// - Confirms the error wraps the last server failure with the attempt
    ///   count.
    /// - Confirms exactly `max_attempts` requests were sent.
    #[tokio::test]
    async fn test_500_exhausts_retries() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/broken"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "boom"}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.request("/v2/broken", RequestOptions::default()).await;

        match result {
            Err(ApiError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                match *source {
                    ApiError::Server { status, ref detail } => {
                        assert_eq!(status, 500);
                        assert_eq!(detail.message, "boom");
                    }
                    ref other => panic!("expected Server, got {other:?}"),
                }
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new(&format!("http://{addr}"), "tok_test").unwrap();
        let client = ApiClient::with_retry(config, fast_policy(2)).unwrap();

        let result = client.request("/v2/user", RequestOptions::default()).await;
        match result {
            Err(ApiError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, ApiError::Network(_)));
            }
            other => panic!("expected RetriesExhausted over Network, got {other:?}"),
        }
    }

    /// Validates the deadline covers backoff waits, not just attempts.
    ///
    /// Assertions:
    /// - Confirms the call ends with a deadline error while the loop is
    ///   parked in a long backoff.
    /// - Confirms only the first attempt was sent.
    #[tokio::test]
    async fn test_deadline_aborts_pending_backoff() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/slow"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = ClientConfig::new(&server.uri(), "tok_test").unwrap();
        let long_backoff = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            jitter: Jitter::None,
        };
        let client = ApiClient::with_retry(config, long_backoff).unwrap();

        let started = Instant::now();
        let options = RequestOptions::default().with_deadline(Duration::from_millis(100));
        let result = client.request("/v2/slow", options).await;

        assert!(matches!(
            result,
            Err(ApiError::DeadlineExceeded { limit }) if limit == Duration::from_millis(100)
        ));
        assert!(started.elapsed() < Duration::from_secs(5), "deadline should cut the backoff");
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    /// Validates cancellation aborts an in-flight attempt.
    ///
    /// Assertions:
    /// - Confirms the call ends with a cancellation error while the server
    ///   is still holding the response.
    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/hanging"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"email": "a@b.c"}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let client = client_for(&server);
        let started = Instant::now();
        let options = RequestOptions::default().with_cancellation(token);
        let result = client.request("/v2/hanging", options).await;

        assert!(matches!(result, Err(ApiError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5), "cancel should cut the request");
    }

    #[tokio::test]
    async fn test_decoding_off_returns_raw_bytes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/download"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"BLOB".to_vec(), "application/octet-stream"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let options = RequestOptions::default().with_json_decoding(false);
        let response = client.request("/v2/download", options).await.unwrap();

        match response {
            ApiResponse::Raw { status, content_type, body } => {
                assert_eq!(status, 200);
                assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
                assert_eq!(body, b"BLOB");
            }
            other => panic!("expected Raw, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_content_type_passes_through() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"line 1\n".to_vec(), "text/plain"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client.request("/v2/logs", RequestOptions::default()).await.unwrap();

        match response {
            ApiResponse::Raw { content_type, body, .. } => {
                assert_eq!(content_type.as_deref(), Some("text/plain"));
                assert_eq!(body, b"line 1\n");
            }
            other => panic!("expected Raw, got {other:?}"),
        }
    }

    /// Validates the bodiless path for the delete scenario.
    ///
    /// Assertions:
    /// - Confirms a 204 without a content type decodes as an empty
    ///   response, and through `()` at the typed layer.
    #[tokio::test]
    async fn test_no_content_yields_empty_response() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v2/deployments/dpl_1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client.delete("/v2/deployments/dpl_1").await.unwrap();

        assert_eq!(response, ApiResponse::Empty { status: 204 });
        response.decode::<()>().unwrap();
    }

    /// Validates that a corrupt JSON body stops the loop.
    ///
    /// Assertions:
    /// - Confirms the failure is a decode error, not a transport error.
    /// - Confirms the request was not retried.
    #[tokio::test]
    async fn test_invalid_json_body_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/user"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"{not json".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.request("/v2/user", RequestOptions::default()).await;

        assert!(matches!(result, Err(ApiError::Decode { status: 200, .. })));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    /// Validates the per-request retry override.
    ///
    /// Assertions:
    /// - Confirms a client whose default policy never retries still retries
    ///   when the request carries its own policy.
    #[tokio::test]
    async fn test_per_request_retry_override() {
        let server = MockServer::start().await;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        Mock::given(method("GET"))
            .and(path("/v2/flaky"))
            .respond_with(move |_: &Request| {
                if hits_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(502)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"email": "a@b.c"}))
                }
            })
            .mount(&server)
            .await;

        let config = ClientConfig::new(&server.uri(), "tok_test").unwrap();
        let client = ApiClient::with_retry(config, fast_policy(1)).unwrap();

        let options = RequestOptions::default().with_retry(fast_policy(2));
        let result = client.request("/v2/flaky", options).await;

        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempt_policy_is_config_error() {
        let server = MockServer::start().await;

        let client = client_for(&server);
        let options = RequestOptions::default().with_retry(fast_policy(0));
        let result = client.request("/v2/user", options).await;

        assert!(matches!(result, Err(ApiError::Config(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_client_is_reusable_across_calls() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/user"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"email": "dev@example.com"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first: User = client.get("/v2/user").await.unwrap();
        let second: User = client.get("/v2/user").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
