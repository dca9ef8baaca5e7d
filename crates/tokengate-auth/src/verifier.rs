//! Bearer token verification
//!
//! [`TokenVerifier::verify`] runs the checks in a fixed order:
//!
//! 1. structure: three base64url segments and a JSON header
//! 2. algorithm: the header `alg` must be in the asymmetric allow-list
//! 3. key: located by `kid`, refreshing the key set at most once
//! 4. signature
//! 5. claims: `exp`, `nbf`, `iss`, `aud` against the injected [`Clock`]
//!
//! Only step 3 may touch the network.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{AuthError, AuthResult};
use crate::jwks::KeySource;

/// Algorithms accepted when none are configured
pub const DEFAULT_ALGORITHMS: [Algorithm; 9] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Claims of a token that passed every check
///
/// Only [`TokenVerifier`] creates these. Custom claims are preserved
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VerifiedClaims(Map<String, Value>);

impl VerifiedClaims {
    pub(crate) fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// A top-level claim
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `sub`
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// `iss`
    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Value::as_str)
    }

    /// `exp`, in seconds since the Unix epoch
    pub fn expires_at(&self) -> Option<u64> {
        self.get("exp").and_then(numeric_date)
    }

    /// Every claim
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the claim map
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Verifies signed bearer tokens against a [`KeySource`]
#[derive(Debug)]
pub struct TokenVerifier {
    keys: Arc<dyn KeySource>,
    clock: Arc<dyn Clock>,
    allowed_algorithms: Vec<Algorithm>,
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Verifier with the default allow-list and no clock skew
    pub fn new(keys: Arc<dyn KeySource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            clock,
            allowed_algorithms: DEFAULT_ALGORITHMS.to_vec(),
            clock_skew: Duration::ZERO,
        }
    }

    /// Replace the algorithm allow-list
    ///
    /// Symmetric algorithms are dropped: the keys come from a public key set.
    pub fn with_allowed_algorithms(
        mut self,
        algorithms: impl IntoIterator<Item = Algorithm>,
    ) -> Self {
        self.allowed_algorithms = algorithms
            .into_iter()
            .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .collect();
        self
    }

    /// Tolerance applied to `exp` and `nbf`
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Verify `token` and return its claims
    ///
    /// # Errors
    ///
    /// Returns the first failing check as an [`AuthError`]:
    /// [`MalformedToken`](AuthError::MalformedToken),
    /// [`UnsupportedAlgorithm`](AuthError::UnsupportedAlgorithm),
    /// [`KeySetUnavailable`](AuthError::KeySetUnavailable),
    /// [`KeyNotFound`](AuthError::KeyNotFound),
    /// [`InvalidSignature`](AuthError::InvalidSignature),
    /// [`TokenExpired`](AuthError::TokenExpired),
    /// [`TokenNotYetValid`](AuthError::TokenNotYetValid),
    /// [`InvalidIssuer`](AuthError::InvalidIssuer) or
    /// [`InvalidAudience`](AuthError::InvalidAudience).
    pub async fn verify(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> AuthResult<VerifiedClaims> {
        match self.verify_inner(token, expected_issuer, expected_audience).await {
            Ok(claims) => {
                debug!(
                    issuer = expected_issuer,
                    sub = claims.subject().unwrap_or_default(),
                    "Token verified"
                );
                Ok(claims)
            }
            Err(e) => {
                warn!(issuer = expected_issuer, code = e.code(), error = %e, "Token rejected");
                Err(e)
            }
        }
    }

    async fn verify_inner(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> AuthResult<VerifiedClaims> {
        let header = parse_header(token)?;
        let alg = self.check_algorithm(&header.alg)?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("token header has no 'kid'".into()))?;

        let mut keys = self.keys.current().await?;
        if keys.find(&kid).is_none() {
            warn!(kid = %kid, "Key not in cached set, refreshing once");
            keys = self.keys.refresh(&keys).await?;
        }
        let key = keys
            .find(&kid)
            .ok_or_else(|| AuthError::KeyNotFound(kid.clone()))?;

        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(map_jwt_error)?;

        self.check_claims(&data.claims, expected_issuer, expected_audience)?;
        Ok(VerifiedClaims::new(data.claims))
    }

    fn check_algorithm(&self, alg: &str) -> AuthResult<Algorithm> {
        match Algorithm::from_str(alg) {
            Ok(parsed) if self.allowed_algorithms.contains(&parsed) => Ok(parsed),
            _ => Err(AuthError::UnsupportedAlgorithm(alg.to_string())),
        }
    }

    fn check_claims(
        &self,
        claims: &Map<String, Value>,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> AuthResult<()> {
        let now = self.clock.unix_seconds();
        let skew = self.clock_skew.as_secs();

        let exp = claims
            .get("exp")
            .and_then(numeric_date)
            .ok_or_else(|| AuthError::MalformedToken("missing or invalid 'exp' claim".into()))?;
        if exp.saturating_add(skew) < now {
            return Err(AuthError::TokenExpired);
        }

        if let Some(nbf) = claims.get("nbf") {
            let nbf = numeric_date(nbf)
                .ok_or_else(|| AuthError::MalformedToken("invalid 'nbf' claim".into()))?;
            if nbf > now.saturating_add(skew) {
                return Err(AuthError::TokenNotYetValid);
            }
        }

        if claims.get("iss").and_then(Value::as_str) != Some(expected_issuer) {
            return Err(AuthError::InvalidIssuer {
                expected: expected_issuer.to_string(),
            });
        }

        let audience_ok = match claims.get("aud") {
            Some(Value::String(aud)) => aud == expected_audience,
            Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(expected_audience)),
            _ => false,
        };
        if !audience_ok {
            return Err(AuthError::InvalidAudience {
                expected: expected_audience.to_string(),
            });
        }

        Ok(())
    }
}

fn parse_header(token: &str) -> AuthResult<RawHeader> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let decode_segment = |name: &str, segment: &str| {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| AuthError::MalformedToken(format!("invalid {name} encoding: {e}")))
    };

    let header = decode_segment("header", segments[0])?;
    decode_segment("payload", segments[1])?;
    decode_segment("signature", segments[2])?;

    serde_json::from_slice(&header)
        .map_err(|e| AuthError::MalformedToken(format!("invalid header: {e}")))
}

fn numeric_date(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        // The allow-list already passed, so an algorithm or key mismatch means
        // the located key cannot have produced this signature
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_) => AuthError::InvalidSignature,
        _ => AuthError::MalformedToken(err.to_string()),
    }
}
