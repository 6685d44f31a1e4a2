use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Categorical error tags surfaced to callers as `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    AuthRequired,
    ConfigMissing,
    OauthError,
    ConnectionError,
    ApiError,
    FetchError,
    NoProducts,
    RateLimited,
    PaymentRequired,
    UnsupportedAction,
    InternalError,
}

impl ErrorKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
            ErrorKind::ConfigMissing => "CONFIG_MISSING",
            ErrorKind::OauthError => "OAUTH_ERROR",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::FetchError => "FETCH_ERROR",
            ErrorKind::NoProducts => "NO_PRODUCTS",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::PaymentRequired => "PAYMENT_REQUIRED",
            ErrorKind::UnsupportedAction => "UNSUPPORTED_ACTION",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// The single error shape every adapter operation resolves to. Raw protocol
/// detail (response bodies, stack traces, credentials) never lands in
/// `message`; it is logged at debug level where it occurs.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SyncError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(kind: ErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: Some(status),
        }
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, message)
    }

    pub fn config_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigMissing, message)
    }

    pub fn oauth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OauthError, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionError, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiError, message)
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FetchError, message)
    }

    pub fn no_products(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoProducts, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedAction, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Classify a non-2xx marketplace response into the taxonomy with a
    /// user-facing message. `what` names the operation, e.g. "Trendyol
    /// category fetch".
    pub fn from_response_status(what: &str, status: u16) -> Self {
        match status {
            401 => Self::with_status(
                ErrorKind::ApiError,
                format!("{what} rejected: credentials are invalid or expired"),
                status,
            ),
            403 => Self::with_status(
                ErrorKind::ApiError,
                format!("{what} rejected: account is inactive or lacks permission"),
                status,
            ),
            429 => Self::with_status(
                ErrorKind::RateLimited,
                format!("{what} throttled by the marketplace, try again shortly"),
                status,
            ),
            500..=599 => Self::with_status(
                ErrorKind::ConnectionError,
                format!("{what} failed: marketplace is unavailable"),
                status,
            ),
            _ => Self::with_status(
                ErrorKind::ApiError,
                format!("{what} failed with HTTP {status}"),
                status,
            ),
        }
    }

    /// Classify a reqwest transport error (timeout, DNS, refused connection).
    pub fn from_transport(what: &str, err: &reqwest::Error) -> Self {
        tracing::debug!(target: "pazarsync.http", error = %err, "{what} transport failure");
        if err.is_timeout() {
            Self::connection(format!("{what} timed out"))
        } else {
            Self::connection(format!("{what} could not reach the marketplace"))
        }
    }
}

/// Wire envelope for every adapter operation: exactly one of `data` / `error`
/// is populated depending on `success`.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct SyncEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl SyncEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_type: None,
            status_code: None,
        }
    }

    pub fn err(error: &SyncError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.message().to_string()),
            error_type: Some(error.kind().tag().to_string()),
            status_code: error.status_code(),
        }
    }
}

impl From<SyncResult<Value>> for SyncEnvelope {
    fn from(result: SyncResult<Value>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::err(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_success_has_data_only() {
        let envelope = SyncEnvelope::ok(json!({"count": 3}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], json!(true));
        assert!(value.get("error").is_none());
        assert!(value.get("error_type").is_none());
        assert_eq!(value["data"]["count"], json!(3));
    }

    #[test]
    fn envelope_failure_has_error_only() {
        let err = SyncError::with_status(ErrorKind::OauthError, "token exchange failed", 401);
        let value = serde_json::to_value(SyncEnvelope::err(&err)).unwrap();
        assert_eq!(value["success"], json!(false));
        assert!(value.get("data").is_none());
        assert_eq!(value["error"], json!("token exchange failed"));
        assert_eq!(value["error_type"], json!("OAUTH_ERROR"));
        assert_eq!(value["status_code"], json!(401));
    }

    #[test]
    fn status_classification() {
        let err = SyncError::from_response_status("Trendyol category fetch", 401);
        assert_eq!(err.kind(), ErrorKind::ApiError);
        assert_eq!(err.status_code(), Some(401));
        assert!(err.message().contains("invalid or expired"));

        let err = SyncError::from_response_status("order push", 429);
        assert_eq!(err.kind(), ErrorKind::RateLimited);

        let err = SyncError::from_response_status("order push", 503);
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
    }

    #[test]
    fn tags_match_taxonomy() {
        assert_eq!(ErrorKind::ConfigMissing.tag(), "CONFIG_MISSING");
        assert_eq!(ErrorKind::NoProducts.tag(), "NO_PRODUCTS");
        assert_eq!(ErrorKind::PaymentRequired.tag(), "PAYMENT_REQUIRED");
    }
}
