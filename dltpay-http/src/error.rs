//! Errors raised while talking to the payment API over HTTP.

use dltpay::api::ApiError;
use http::StatusCode;

/// Errors that can occur while interacting with the remote payment API.
#[derive(Debug, thiserror::Error)]
pub enum HttpApiError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response was not JSON.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response was JSON of the wrong shape.
    #[error("Unexpected response shape: {context}: {source}")]
    Decode {
        /// Human-readable context.
        context: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A field was present but out of range.
    #[error("Invalid response field: {context}: {message}")]
    InvalidField {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong.
        message: String,
    },
    /// The API refused the request with `{success: false, error}`.
    #[error("Rejected: {context}: {message}")]
    Rejected {
        /// Human-readable context.
        context: &'static str,
        /// Machine-readable code, when the API sent one.
        code: Option<String>,
        /// Server-provided message.
        message: String,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The wallet-auth endpoint did not issue a usable token.
    #[error("Wallet auth token unavailable for {wallet}: {reason}")]
    AuthToken {
        /// Wallet the token was requested for.
        wallet: String,
        /// Why no token was issued.
        reason: String,
    },
}

impl From<HttpApiError> for ApiError {
    fn from(err: HttpApiError) -> Self {
        match err {
            HttpApiError::Rejected { code, message, .. } => Self::rejected(code.as_deref(), message),
            HttpApiError::JsonDeserialization { .. }
            | HttpApiError::Decode { .. }
            | HttpApiError::InvalidField { .. } => Self::Decode(err.to_string()),
            HttpApiError::HttpStatus { status, .. } if status.is_client_error() => {
                Self::Decode(err.to_string())
            }
            HttpApiError::UrlParse { .. }
            | HttpApiError::Http { .. }
            | HttpApiError::HttpStatus { .. }
            | HttpApiError::ResponseBodyRead { .. }
            | HttpApiError::AuthToken { .. } => Self::Network(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use dltpay::api::ApiErrorCode;

    use super::*;

    #[test]
    fn test_rejection_keeps_its_code() {
        let err: ApiError = HttpApiError::Rejected {
            context: "POST /nfc/payment",
            code: None,
            message: "NO_SIGNER_AUTHORITY".into(),
        }
        .into();
        assert_eq!(err.code(), Some(ApiErrorCode::NoSignerAuthority));
        assert_eq!(err.to_string(), "NO_SIGNER_AUTHORITY");
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err: ApiError = HttpApiError::HttpStatus {
            context: "GET /wallet/status",
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, ApiError::Network(_)));

        let err: ApiError = HttpApiError::HttpStatus {
            context: "GET /wallet/status",
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
