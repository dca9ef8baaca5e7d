//! Error taxonomy for token verification and authorization
//!
//! Every failure here is scoped to the single request/token being evaluated.
//! Verification failures map to HTTP 401; a valid token that fails its
//! authorization predicate maps to HTTP 403.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Request-scoped verification and authorization errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The discovery endpoint was unreachable or returned a non-success status
    #[error("Discovery document unavailable from {url}: {reason}")]
    DiscoveryUnavailable {
        /// Metadata URL that was requested
        url: String,
        /// Transport or status failure
        reason: String,
    },

    /// The discovery document lacked required fields or was not JSON
    #[error("Discovery document at {url} is malformed: {reason}")]
    DiscoveryMalformed {
        /// Metadata URL that was requested
        url: String,
        /// What was wrong with the document
        reason: String,
    },

    /// The signing key set could not be fetched or contained no usable keys
    #[error("Signing key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// Wrong segment count, invalid encoding, or missing required claims
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Header algorithm is not in the asymmetric allow-list
    #[error("Algorithm '{0}' is not allowed")]
    UnsupportedAlgorithm(String),

    /// No key with the header's `kid`, even after one refresh
    #[error("Unable to find appropriate key for kid '{0}'")]
    KeyNotFound(String),

    /// Signature did not verify against the located key
    #[error("Token signature is invalid")]
    InvalidSignature,

    /// `exp` is in the past
    #[error("Token is expired")]
    TokenExpired,

    /// `nbf` is in the future
    #[error("Token is not valid yet")]
    TokenNotYetValid,

    /// `iss` does not equal the expected issuer
    #[error("Incorrect issuer: expected '{expected}'")]
    InvalidIssuer {
        /// Issuer the verifier was configured with
        expected: String,
    },

    /// The expected audience is not present in `aud`
    #[error("Incorrect audience: '{expected}' not present")]
    InvalidAudience {
        /// Audience the verifier was configured with
        expected: String,
    },

    /// No `Authorization` header on the request
    #[error("Authorization header is expected")]
    MissingAuthorization,

    /// `Authorization` header present but not a well-formed bearer credential
    #[error("{0}")]
    InvalidHeader(String),

    /// The token verified, but the authorization predicate evaluated to false
    #[error("You don't have access to this resource: {0}")]
    AuthorizationDenied(String),
}

/// Coarse classification used by the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller is not authenticated (401)
    Verification,
    /// Caller is authenticated but not permitted (403)
    Authorization,
}

impl AuthError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::DiscoveryUnavailable { .. } => "discovery_unavailable",
            Self::DiscoveryMalformed { .. } => "discovery_malformed",
            Self::KeySetUnavailable(_) => "key_set_unavailable",
            Self::MalformedToken(_) => "malformed_token",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::KeyNotFound(_) => "key_not_found",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::InvalidIssuer { .. } => "invalid_issuer",
            Self::InvalidAudience { .. } => "invalid_audience",
            Self::MissingAuthorization => "authorization_header_missing",
            Self::InvalidHeader(_) => "invalid_header",
            Self::AuthorizationDenied(_) => "authorization_denied",
        }
    }

    /// Whether the token was rejected or merely lacked permission
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthorizationDenied(_) => ErrorCategory::Authorization,
            _ => ErrorCategory::Verification,
        }
    }

    /// HTTP status the framework should answer with
    pub fn status(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::Verification => StatusCode::UNAUTHORIZED,
            ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        }
    }

    /// Serializable `{code, description}` body for error responses
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            description: self.to_string(),
        }
    }
}

/// JSON error payload returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code
    pub code: String,
    /// Human-readable description
    pub description: String,
}
