//! Response decoding
//!
//! Applies the platform's content-type rules to successful responses and
//! digs the error payload out of failed ones. JSON is the default shape;
//! everything else passes through as bytes.

use reqwest::header;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::{ApiError, ErrorDetail};

/// Decoded outcome of a successful request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// The body was JSON and has been parsed.
    Json { status: u16, value: serde_json::Value },
    /// The body was returned undecoded, either because decoding was turned
    /// off or the content type was not JSON.
    Raw { status: u16, content_type: Option<String>, body: Vec<u8> },
    /// The response carried nothing decodable (no content type or an empty
    /// JSON body).
    Empty { status: u16 },
}

impl ApiResponse {
    /// HTTP status of the response.
    pub fn status(&self) -> u16 {
        match self {
            Self::Json { status, .. } | Self::Raw { status, .. } | Self::Empty { status } => {
                *status
            }
        }
    }

    /// Convert the response into a typed value.
    ///
    /// Empty responses decode through JSON `null`, so `()` and `Option<T>`
    /// targets accept bodiless statuses like 204.
    ///
    /// # Errors
    /// Returns `ApiError::Decode` if the value does not fit `T` or the
    /// response was never decoded as JSON.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            Self::Json { status, value } => serde_json::from_value(value)
                .map_err(|e| ApiError::Decode { status, message: e.to_string() }),
            Self::Empty { status } => serde_json::from_value(serde_json::Value::Null).map_err(
                |_| ApiError::Decode {
                    status,
                    message: "response had no content, but the target type cannot be built \
                              from an empty body"
                        .to_string(),
                },
            ),
            Self::Raw { status, content_type, .. } => Err(ApiError::Decode {
                status,
                message: format!(
                    "response was not decoded as JSON (content type {})",
                    content_type.as_deref().unwrap_or("unknown")
                ),
            }),
        }
    }
}

/// Read a success response according to its content type.
///
/// With decoding off the body always passes through as bytes. Otherwise a
/// missing content type means an empty response, a JSON content type is
/// parsed, and anything else passes through raw.
pub(crate) async fn read_success(
    response: reqwest::Response,
    decode_json: bool,
) -> Result<ApiResponse, ApiError> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response
        .bytes()
        .await
        .map_err(|e| ApiError::Network(format!("Failed to read response body: {e}")))?;

    if !decode_json {
        return Ok(ApiResponse::Raw { status, content_type, body: body.to_vec() });
    }

    let Some(content_type) = content_type else {
        return Ok(ApiResponse::Empty { status });
    };

    if content_type.to_ascii_lowercase().contains("application/json") {
        if body.is_empty() {
            return Ok(ApiResponse::Empty { status });
        }
        let value = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Decode { status, message: e.to_string() })?;
        return Ok(ApiResponse::Json { status, value });
    }

    Ok(ApiResponse::Raw { status, content_type: Some(content_type), body: body.to_vec() })
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    error: Option<WireError>,
}

/// Extract the error payload from a failed response body.
///
/// Understands the platform envelope `{"error": {"message", "code"}}` and a
/// bare `{"message", "code"}` object; any other body is carried verbatim as
/// the message.
pub(crate) fn error_detail(status: u16, body: &[u8]) -> ErrorDetail {
    if let Ok(WireEnvelope { error: Some(error) }) = serde_json::from_slice::<WireEnvelope>(body) {
        return wire_to_detail(error, status);
    }
    if let Ok(error) = serde_json::from_slice::<WireError>(body) {
        if error.message.is_some() || error.code.is_some() {
            return wire_to_detail(error, status);
        }
    }

    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        ErrorDetail::new(format!("Response error ({status})"))
    } else {
        ErrorDetail::new(trimmed)
    }
}

fn wire_to_detail(error: WireError, status: u16) -> ErrorDetail {
    ErrorDetail {
        message: error.message.unwrap_or_else(|| format!("Response error ({status})")),
        code: error.code,
    }
}
