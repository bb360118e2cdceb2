//! Client configuration
//!
//! Immutable settings shared by every request a client makes. Construction
//! validates once so the request path never re-checks.
//!
//! ## Environment Variables
//! - `AIRLIFT_API_URL`: Base URL of the platform API (default
//!   `https://api.airlift.dev`)
//! - `AIRLIFT_TOKEN`: Bearer token for authentication (required)
//! - `AIRLIFT_TEAM_ID`: Team to scope requests to (optional)
//! - `AIRLIFT_DEBUG`: Enable per-attempt debug logging (true/false)

use std::time::Duration;

use url::Url;

use crate::errors::ApiError;

/// Base URL used when `AIRLIFT_API_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "https://api.airlift.dev";

/// Whole-request timeout applied by the underlying HTTP client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable configuration for an API client.
///
/// Cloning is cheap enough to hand a copy to each client; none of the fields
/// can change after construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    pub base_url: Url,
    /// Bearer token sent in the `Authorization` header.
    pub auth_token: String,
    /// Team every request is scoped to, unless a request opts out.
    pub team_id: Option<String>,
    /// When set, each attempt and failure is logged at debug level.
    pub debug: bool,
    /// Per-request timeout enforced by the HTTP transport.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Build a configuration from a base URL and bearer token.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the URL does not parse, cannot serve as
    /// a base for request paths, or the token is empty.
    pub fn new(base_url: &str, auth_token: impl Into<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("Invalid base URL `{base_url}`: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!(
                "Base URL `{base_url}` cannot have request paths appended"
            )));
        }
        let auth_token = auth_token.into();
        if auth_token.is_empty() {
            return Err(ApiError::Config("Auth token must not be empty".to_string()));
        }

        Ok(Self { base_url, auth_token, team_id: None, debug: false, timeout: DEFAULT_TIMEOUT })
    }

    /// Scope every request made with this configuration to a team.
    #[must_use]
    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Enable per-attempt debug logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Override the transport-level request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// `AIRLIFT_TOKEN` is required; everything else has a default. See the
    /// module documentation for the complete list.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the token is missing or the base URL is
    /// invalid.
    pub fn from_env() -> Result<Self, ApiError> {
        let base_url =
            std::env::var("AIRLIFT_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let auth_token = env_var("AIRLIFT_TOKEN")?;

        let mut config = Self::new(&base_url, auth_token)?;
        if let Ok(team_id) = std::env::var("AIRLIFT_TEAM_ID") {
            if !team_id.is_empty() {
                config.team_id = Some(team_id);
            }
        }
        config.debug = env_bool("AIRLIFT_DEBUG", false);

        tracing::debug!(
            base_url = %config.base_url,
            team_id = ?config.team_id,
            "loaded client configuration from environment"
        );
        Ok(config)
    }
}

/// Get required environment variable
///
/// # Errors
/// Returns `ApiError::Config` if the variable is not set or empty.
fn env_var(key: &str) -> Result<String, ApiError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ApiError::Config(format!("Missing required environment variable: {key}"))),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
