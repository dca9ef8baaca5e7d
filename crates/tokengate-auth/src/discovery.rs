//! OpenID Connect discovery
//!
//! Resolves `{issuer}/.well-known/openid-configuration` into a
//! [`DiscoveryDocument`] and caches it per metadata URL. The issuer's path
//! is preserved, so realm-style issuers
//! (`https://sso.example.com/realms/acme`) resolve under the realm.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheStats, TtlCache};
use crate::clock::Clock;
use crate::error::{AuthError, AuthResult};
use crate::fetch::{FetchError, HttpFetcher, get_json_within};

const WELL_KNOWN_SUFFIX: &str = ".well-known/openid-configuration";

/// Provider metadata needed for verification and token grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier the provider claims for itself
    pub issuer: String,
    /// Where the signing key set lives
    pub jwks_uri: Url,
    /// Token endpoint for grants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<Url>,
    /// Interactive authorization endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<Url>,
    /// UserInfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,
    /// RP-initiated logout endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<Url>,
    /// Token introspection endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<Url>,
    /// Advertised scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    /// Advertised grant types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types_supported: Vec<String>,
    /// Advertised ID token signing algorithms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Parse a fetched metadata document
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DiscoveryMalformed`] if `issuer` or `jwks_uri` is
    /// missing or unusable, or any optional field has the wrong shape.
    pub fn from_json(url: &Url, value: serde_json::Value) -> AuthResult<Self> {
        let malformed = |reason: String| AuthError::DiscoveryMalformed {
            url: url.to_string(),
            reason,
        };

        let object = value
            .as_object()
            .ok_or_else(|| malformed("document is not a JSON object".into()))?;

        match object.get("issuer").and_then(|v| v.as_str()) {
            Some(issuer) if !issuer.is_empty() => {}
            _ => return Err(malformed("missing required field 'issuer'".into())),
        }
        match object.get("jwks_uri").and_then(|v| v.as_str()) {
            Some(uri) => {
                Url::parse(uri).map_err(|e| malformed(format!("invalid jwks_uri '{uri}': {e}")))?;
            }
            None => return Err(malformed("missing required field 'jwks_uri'".into())),
        }

        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
    }
}

/// Build the metadata URL for an issuer
///
/// A URL that already ends in `/.well-known/openid-configuration` is used
/// as-is.
///
/// # Errors
///
/// Returns [`AuthError::DiscoveryMalformed`] if the joined URL is invalid.
pub fn discovery_url(issuer: &Url) -> AuthResult<Url> {
    if issuer.path().ends_with(WELL_KNOWN_SUFFIX) {
        return Ok(issuer.clone());
    }
    let base = issuer.as_str().trim_end_matches('/');
    let joined = format!("{base}/{WELL_KNOWN_SUFFIX}");
    Url::parse(&joined).map_err(|e| AuthError::DiscoveryMalformed {
        url: joined.clone(),
        reason: e.to_string(),
    })
}

fn issuers_match(expected: &Url, advertised: &str) -> bool {
    expected.as_str().trim_end_matches('/') == advertised.trim_end_matches('/')
}

/// Fetches and caches discovery documents
#[derive(Debug)]
pub struct DiscoveryResolver {
    fetcher: Arc<dyn HttpFetcher>,
    cache: TtlCache<DiscoveryDocument>,
    fetch_timeout: Duration,
}

impl DiscoveryResolver {
    /// Create a resolver caching documents for `ttl`
    pub fn new(fetcher: Arc<dyn HttpFetcher>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            cache: TtlCache::new("discovery", ttl, clock),
            fetch_timeout: Duration::from_secs(10),
        }
    }

    /// Bound each metadata fetch by `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Discovery document for `issuer`, from cache while fresh
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DiscoveryUnavailable`] on transport failure,
    /// timeout or non-success status, and [`AuthError::DiscoveryMalformed`]
    /// when the body is not a usable document. Failures are not cached.
    pub async fn resolve(&self, issuer: &Url) -> AuthResult<Arc<DiscoveryDocument>> {
        let url = discovery_url(issuer)?;
        self.cache
            .get_or_fetch(url.as_str(), || self.fetch(issuer, &url))
            .await
    }

    /// Refetch the document for `issuer`, bypassing the cache
    ///
    /// # Errors
    ///
    /// Same as [`DiscoveryResolver::resolve`].
    pub async fn refresh(&self, issuer: &Url) -> AuthResult<Arc<DiscoveryDocument>> {
        let url = discovery_url(issuer)?;
        self.cache
            .refresh(url.as_str(), None, || self.fetch(issuer, &url))
            .await
    }

    /// Cache counters
    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    async fn fetch(&self, issuer: &Url, url: &Url) -> AuthResult<DiscoveryDocument> {
        info!(url = %url, "Fetching OpenID Connect discovery document");

        let value = get_json_within(self.fetcher.as_ref(), url, self.fetch_timeout)
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Discovery fetch failed");
                match e {
                    FetchError::InvalidJson(reason) => AuthError::DiscoveryMalformed {
                        url: url.to_string(),
                        reason,
                    },
                    other => AuthError::DiscoveryUnavailable {
                        url: url.to_string(),
                        reason: other.to_string(),
                    },
                }
            })?;

        let document = DiscoveryDocument::from_json(url, value)?;

        if !issuers_match(issuer, &document.issuer) {
            warn!(
                expected = %issuer,
                advertised = %document.issuer,
                "Discovery document advertises a different issuer"
            );
        }

        info!(url = %url, jwks_uri = %document.jwks_uri, "Discovery document cached");
        Ok(document)
    }
}
