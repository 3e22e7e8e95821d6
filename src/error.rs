//! Error types for the gift price resolver

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed upstream attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 429 or a provider-specific throttling message
    RateLimited,
    /// HTTP 401 or an invalid-token signal
    AuthError,
    /// HTTP 5xx, timeouts and connection failures
    ServerError,
    /// Any other 4xx, malformed response or unknown subject
    PermanentError,
}

impl ErrorKind {
    /// How much a caller learns from this kind. Higher wins when aggregating.
    pub fn specificity(self) -> u8 {
        match self {
            ErrorKind::RateLimited | ErrorKind::AuthError => 2,
            ErrorKind::ServerError => 1,
            ErrorKind::PermanentError => 0,
        }
    }

    /// Returns the more specific of two kinds, keeping `self` on ties
    pub fn most_specific(self, other: ErrorKind) -> ErrorKind {
        if other.specificity() > self.specificity() {
            other
        } else {
            self
        }
    }

    /// Classifies a free-form error message the way upstream SDKs report them
    ///
    /// Status codes only count as standalone tokens, so `"HTTP 429"` is rate
    /// limited but an id like `14290` is not.
    pub fn classify_message(message: &str) -> ErrorKind {
        classify_text(message, true)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::PermanentError => "permanent_error",
        }
    }
}

fn classify_text(message: &str, with_status_codes: bool) -> ErrorKind {
    let lower = message.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let has_code = |codes: &[&str]| {
        with_status_codes
            && lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| codes.contains(&token))
    };

    if has_code(&["429"])
        || contains_any(&[
            "rate limit",
            "too many requests",
            "too many operations",
            "cloudflare",
            "just a moment",
        ])
    {
        ErrorKind::RateLimited
    } else if has_code(&["401"]) || contains_any(&["unauthorized", "invalid auth", "bad token"]) {
        ErrorKind::AuthError
    } else if has_code(&["500", "502", "503", "504"])
        || contains_any(&["server error", "timeout"])
    {
        ErrorKind::ServerError
    } else {
        ErrorKind::PermanentError
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while talking to a single upstream
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid response from upstream
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Upstream does not list the subject
    #[error("Subject not found: {0}")]
    NotFound(String),

    /// Strategy needs a token but none was supplied
    #[error("Missing auth token")]
    MissingToken,
}

impl TransportError {
    /// Maps the error onto the resolver's error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::NetworkError(e) => match e.status() {
                Some(status) => classify_status(status.as_u16(), ""),
                None => ErrorKind::ServerError,
            },
            TransportError::Status { status, body } => classify_status(*status, body),
            TransportError::InvalidResponse(_) | TransportError::NotFound(_) => {
                ErrorKind::PermanentError
            }
            TransportError::MissingToken => ErrorKind::AuthError,
        }
    }
}

fn classify_status(status: u16, body: &str) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimited,
        401 => ErrorKind::AuthError,
        500..=599 => ErrorKind::ServerError,
        // CloudFlare challenge pages come back as 403/503 with an HTML body.
        // The status is known, so digits in the body are never read as one.
        _ => match classify_text(body, false) {
            ErrorKind::ServerError => ErrorKind::PermanentError,
            kind => kind,
        },
    }
}

/// Tagged failure value returned by a transport strategy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StrategyFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl StrategyFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentError, message)
    }
}

impl From<TransportError> for StrategyFailure {
    fn from(err: TransportError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Errors from obtaining or persisting an auth token
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// The token source could not produce a token
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// The token source produced an empty token
    #[error("Token source returned an empty token")]
    EmptyToken,

    /// Reading or writing the token file failed
    #[error("Token persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// The token file is not valid JSON
    #[error("Token file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors from the durable historical store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored price is not a decimal: {0}")]
    InvalidPrice(String),

    #[error("Corrupt history row: {0}")]
    CorruptRow(String),
}

/// Errors while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },

    #[error("Failed to read subject catalog {path}: {source}")]
    CatalogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse subject catalog {path}: {source}")]
    CatalogParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid(var: &'static str, message: impl fmt::Display) -> Self {
        Self::InvalidValue {
            var,
            message: message.to_string(),
        }
    }
}

/// Errors while assembling a resolver from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The only failure the resolver surfaces to its callers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// No live, cached or historical price exists
    #[error("Price data not available for {subject}")]
    NoPriceData { subject: String },

    /// The caller's timeout elapsed before a price was found
    #[error("Price lookup for {subject} timed out after {after:?}")]
    TimedOut { subject: String, after: Duration },
}

impl Unavailable {
    pub fn no_price_data(subject: &str) -> Self {
        Self::NoPriceData {
            subject: subject.to_string(),
        }
    }

    pub fn timed_out(subject: &str, after: Duration) -> Self {
        Self::TimedOut {
            subject: subject.to_string(),
            after,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            Unavailable::NoPriceData { subject } | Unavailable::TimedOut { subject, .. } => {
                subject
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specificity_prefers_rate_limit_and_auth() {
        assert_eq!(
            ErrorKind::PermanentError.most_specific(ErrorKind::RateLimited),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::ServerError.most_specific(ErrorKind::PermanentError),
            ErrorKind::ServerError
        );
        assert_eq!(
            ErrorKind::AuthError.most_specific(ErrorKind::RateLimited),
            ErrorKind::AuthError
        );
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            ErrorKind::classify_message("Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::classify_message("requestError: 401 Unauthorized"),
            ErrorKind::AuthError
        );
        assert_eq!(
            ErrorKind::classify_message("gateway timeout"),
            ErrorKind::ServerError
        );
        assert_eq!(
            ErrorKind::classify_message("gift not found"),
            ErrorKind::PermanentError
        );
        assert_eq!(
            ErrorKind::classify_message("HTTP 503: upstream down"),
            ErrorKind::ServerError
        );
        assert_eq!(
            ErrorKind::classify_message("gift #14290 has no listings"),
            ErrorKind::PermanentError
        );
    }

    #[test]
    fn test_status_classification() {
        let kind = |status, body: &str| {
            TransportError::Status {
                status,
                body: body.to_string(),
            }
            .kind()
        };

        assert_eq!(kind(429, ""), ErrorKind::RateLimited);
        assert_eq!(kind(401, ""), ErrorKind::AuthError);
        assert_eq!(kind(502, ""), ErrorKind::ServerError);
        assert_eq!(kind(404, "not found"), ErrorKind::PermanentError);
        assert_eq!(
            kind(403, "<title>Just a moment...</title>"),
            ErrorKind::RateLimited
        );
        // A 4xx whose body happens to mention a timeout is still permanent
        assert_eq!(kind(400, "timeout field invalid"), ErrorKind::PermanentError);
        // Ids inside a body are not status codes
        assert_eq!(
            kind(404, r#"{"error":"gift #14290 not found"}"#),
            ErrorKind::PermanentError
        );
        assert_eq!(kind(404, r#"{"error":"item 401 missing"}"#), ErrorKind::PermanentError);
    }
}
