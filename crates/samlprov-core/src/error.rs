use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use crate::models::FeatureState;

/// Which embedded console value an extraction was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Xsrf,
    Sso,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Xsrf => f.write_str("xsrf token"),
            TokenKind::Sso => f.write_str("sso exchange token"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Could not locate {token} in response from {url}")]
    ExtractionFailure { token: TokenKind, url: String },

    #[error("Network error: {0}")]
    TransientNetwork(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("Rate limited by {url}")]
    RateLimited { url: String },

    #[error("Rate limit prevented the completion of the request: {url}")]
    RateLimitExceeded { url: String },

    #[error("Response from {url} carried provider error {marker}")]
    EmbeddedError { url: String, marker: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Application {app_id} does not yet report {feature} as {expected}")]
    VerificationPending {
        app_id: String,
        feature: String,
        expected: FeatureState,
    },

    #[error(
        "Gave up waiting for application {app_id} to report {feature} as {expected}; \
         the console change may or may not have been applied"
    )]
    VerificationTimeout {
        app_id: String,
        feature: String,
        expected: FeatureState,
    },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How the governor should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry after the policy's transient backoff.
    Transient,
    /// Retry after the policy's (longer) rate limit backoff.
    RateLimited,
    /// Stop immediately.
    Fatal,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ProvisionError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        match status.as_u16() {
            404 => ProvisionError::NotFound(url.to_string()),
            429 => ProvisionError::RateLimited {
                url: url.to_string(),
            },
            _ => ProvisionError::UnexpectedStatus {
                status,
                url: url.to_string(),
                body: Self::truncate_body(body),
            },
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ProvisionError::TransientNetwork(_)
            | ProvisionError::UnexpectedStatus { .. }
            | ProvisionError::ExtractionFailure { .. }
            | ProvisionError::EmbeddedError { .. }
            | ProvisionError::VerificationPending { .. } => Disposition::Transient,
            ProvisionError::RateLimited { .. } => Disposition::RateLimited,
            ProvisionError::AuthenticationFailure(_)
            | ProvisionError::RateLimitExceeded { .. }
            | ProvisionError::NotFound(_)
            | ProvisionError::VerificationTimeout { .. }
            | ProvisionError::InvalidResponse { .. }
            | ProvisionError::Cancelled
            | ProvisionError::Config(_) => Disposition::Fatal,
        }
    }

    /// Convert a per-attempt failure into its terminal form once the
    /// attempt budget is spent.
    pub fn exhausted(self) -> Self {
        match self {
            ProvisionError::RateLimited { url } => ProvisionError::RateLimitExceeded { url },
            ProvisionError::VerificationPending {
                app_id,
                feature,
                expected,
            } => ProvisionError::VerificationTimeout {
                app_id,
                feature,
                expected,
            },
            other => other,
        }
    }
}
