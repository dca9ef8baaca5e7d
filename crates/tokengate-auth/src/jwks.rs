//! Signing key sets (JWKS)
//!
//! [`KeySetProvider`] fetches and caches key sets per `jwks_uri`.
//! [`KeySource`] is what the verifier sees: "the current keys" plus "refresh
//! once, I saw a kid you don't have". [`IssuerKeySource`] finds the key-set
//! location through discovery; [`JwksUriKeySource`] uses a configured one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, PublicKeyUse};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth_metrics;
use crate::cache::{CacheStats, TtlCache};
use crate::clock::Clock;
use crate::discovery::{DiscoveryDocument, DiscoveryResolver};
use crate::error::{AuthError, AuthResult};
use crate::fetch::{HttpFetcher, get_json_within};

/// One usable signing key
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    jwk: Jwk,
    decoding: DecodingKey,
}

impl SigningKey {
    /// Key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The published JWK
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// Key prepared for signature checks
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// JWK `kty`
    pub fn key_type(&self) -> &'static str {
        match self.jwk.algorithm {
            AlgorithmParameters::RSA(_) => "RSA",
            AlgorithmParameters::EllipticCurve(_) => "EC",
            AlgorithmParameters::OctetKeyPair(_) => "OKP",
            AlgorithmParameters::OctetKey(_) => "oct",
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kty", &self.key_type())
            .finish_non_exhaustive()
    }
}

/// Summary of a key, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySummary {
    /// Key identifier
    pub kid: String,
    /// JWK `kty`
    pub kty: &'static str,
    /// JWK `alg`, when published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

/// Immutable snapshot of a provider's signing keys
#[derive(Debug, Clone)]
pub struct KeySet {
    source: String,
    keys: Vec<SigningKey>,
}

impl KeySet {
    /// Parse a fetched JWKS document
    ///
    /// Encryption keys, symmetric keys, keys without a `kid` and keys that
    /// fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetUnavailable`] if the document has no `keys`
    /// array or none of its keys is usable for signature checks.
    pub fn from_json(source: &Url, value: &serde_json::Value) -> AuthResult<Self> {
        let entries = value
            .get("keys")
            .and_then(|k| k.as_array())
            .ok_or_else(|| AuthError::KeySetUnavailable(format!("{source}: no 'keys' array")))?;

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let jwk: Jwk = match serde_json::from_value(entry.clone()) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!(jwks_uri = %source, error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };
            if let Some(key) = Self::signing_key(source, jwk) {
                keys.push(key);
            }
        }

        if keys.is_empty() {
            return Err(AuthError::KeySetUnavailable(format!(
                "{source}: no usable signing keys"
            )));
        }

        Ok(Self {
            source: source.to_string(),
            keys,
        })
    }

    fn signing_key(source: &Url, jwk: Jwk) -> Option<SigningKey> {
        let Some(kid) = jwk.common.key_id.clone() else {
            warn!(jwks_uri = %source, "Skipping JWK without kid");
            return None;
        };
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            debug!(jwks_uri = %source, kid = %kid, "Skipping encryption key");
            return None;
        }
        if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
            warn!(jwks_uri = %source, kid = %kid, "Skipping symmetric key");
            return None;
        }
        match DecodingKey::from_jwk(&jwk) {
            Ok(decoding) => Some(SigningKey { kid, jwk, decoding }),
            Err(e) => {
                warn!(jwks_uri = %source, kid = %kid, error = %e, "Skipping unusable JWK");
                None
            }
        }
    }

    /// Key with the given `kid`
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Where the set was fetched from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// All usable keys
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false for a successfully parsed set
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Display summaries of every key
    pub fn summaries(&self) -> Vec<KeySummary> {
        self.keys
            .iter()
            .map(|k| KeySummary {
                kid: k.kid.clone(),
                kty: k.key_type(),
                alg: k.jwk.common.key_algorithm.as_ref().map(|a| format!("{a:?}")),
            })
            .collect()
    }
}

/// Fetches and caches key sets, keyed by `jwks_uri`
#[derive(Debug)]
pub struct KeySetProvider {
    fetcher: Arc<dyn HttpFetcher>,
    cache: TtlCache<KeySet>,
    fetch_timeout: Duration,
    min_refresh_interval: Duration,
}

impl KeySetProvider {
    /// Create a provider caching key sets for `ttl`
    pub fn new(fetcher: Arc<dyn HttpFetcher>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            cache: TtlCache::new("jwks", ttl, clock),
            fetch_timeout: Duration::from_secs(10),
            min_refresh_interval: Duration::ZERO,
        }
    }

    /// Bound each key-set fetch by `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Ignore forced refreshes within `interval` of the last fetch
    ///
    /// Zero (the default) refetches for every unknown `kid`; see
    /// `ProviderConfig::min_refresh_interval`.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Key set named by a discovery document
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetUnavailable`] if the set cannot be fetched
    /// or has no usable keys.
    pub async fn get_keys(&self, discovery: &DiscoveryDocument) -> AuthResult<Arc<KeySet>> {
        self.get_keys_from(&discovery.jwks_uri).await
    }

    /// Key set at `jwks_uri`, from cache while fresh
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetUnavailable`] if the set cannot be fetched
    /// or has no usable keys. A stale entry is never served.
    pub async fn get_keys_from(&self, jwks_uri: &Url) -> AuthResult<Arc<KeySet>> {
        self.cache
            .get_or_fetch(jwks_uri.as_str(), || self.fetch(jwks_uri))
            .await
    }

    /// Refetch the key set at `jwks_uri`
    ///
    /// `stale` is the snapshot the caller found lacking; if the cache already
    /// holds a newer fresh snapshot, that one is returned without fetching.
    /// Within `min_refresh_interval` of the last fetch the current snapshot
    /// is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetUnavailable`] if the set cannot be fetched.
    pub async fn refresh(
        &self,
        jwks_uri: &Url,
        stale: Option<&Arc<KeySet>>,
    ) -> AuthResult<Arc<KeySet>> {
        let key = jwks_uri.as_str();

        if !self.min_refresh_interval.is_zero()
            && let Some(entry) = self.cache.peek(key).await
        {
            let now = self.cache.clock().now();
            if entry.is_fresh(now)
                && let Ok(since_last) = now.duration_since(entry.fetched_at())
                && since_last < self.min_refresh_interval
            {
                warn!(
                    jwks_uri = %jwks_uri,
                    since_last_ms = since_last.as_millis(),
                    "JWKS refresh rate limited, using cache"
                );
                return Ok(Arc::clone(entry.value()));
            }
        }

        self.cache
            .refresh(key, stale, || self.fetch(jwks_uri))
            .await
    }

    /// Cache counters
    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    async fn fetch(&self, jwks_uri: &Url) -> AuthResult<KeySet> {
        info!(jwks_uri = %jwks_uri, "Fetching JWKS from endpoint");

        let fetched = get_json_within(self.fetcher.as_ref(), jwks_uri, self.fetch_timeout).await;
        let result = match fetched {
            Ok(value) => KeySet::from_json(jwks_uri, &value),
            Err(e) => Err(AuthError::KeySetUnavailable(format!("{jwks_uri}: {e}"))),
        };

        match &result {
            Ok(keys) => info!(jwks_uri = %jwks_uri, key_count = keys.len(), "JWKS fetched"),
            Err(e) => error!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch JWKS"),
        }
        auth_metrics::record_key_fetch(result.is_ok());
        result
    }
}

/// Where the verifier gets its keys
#[async_trait]
pub trait KeySource: Send + Sync + fmt::Debug {
    /// The current key set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetUnavailable`] when no fresh set can be had.
    async fn current(&self) -> AuthResult<Arc<KeySet>>;

    /// A newer key set than `stale`, fetching at most once
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetUnavailable`] when the refetch fails.
    async fn refresh(&self, stale: &Arc<KeySet>) -> AuthResult<Arc<KeySet>>;
}

/// Keys located through the issuer's discovery document
#[derive(Debug, Clone)]
pub struct IssuerKeySource {
    issuer: Url,
    resolver: Arc<DiscoveryResolver>,
    provider: Arc<KeySetProvider>,
}

impl IssuerKeySource {
    /// Keys for `issuer`
    pub fn new(
        issuer: Url,
        resolver: Arc<DiscoveryResolver>,
        provider: Arc<KeySetProvider>,
    ) -> Self {
        Self {
            issuer,
            resolver,
            provider,
        }
    }

    async fn jwks_uri(&self) -> AuthResult<Url> {
        let document = self.resolver.resolve(&self.issuer).await.map_err(|e| {
            error!(issuer = %self.issuer, error = %e, "Cannot locate key set");
            AuthError::KeySetUnavailable(e.to_string())
        })?;
        Ok(document.jwks_uri.clone())
    }
}

#[async_trait]
impl KeySource for IssuerKeySource {
    async fn current(&self) -> AuthResult<Arc<KeySet>> {
        let jwks_uri = self.jwks_uri().await?;
        self.provider.get_keys_from(&jwks_uri).await
    }

    async fn refresh(&self, stale: &Arc<KeySet>) -> AuthResult<Arc<KeySet>> {
        let jwks_uri = self.jwks_uri().await?;
        self.provider.refresh(&jwks_uri, Some(stale)).await
    }
}

/// Keys at a configured `jwks_uri`, no discovery round-trip
#[derive(Debug, Clone)]
pub struct JwksUriKeySource {
    jwks_uri: Url,
    provider: Arc<KeySetProvider>,
}

impl JwksUriKeySource {
    /// Keys at `jwks_uri`
    pub fn new(jwks_uri: Url, provider: Arc<KeySetProvider>) -> Self {
        Self { jwks_uri, provider }
    }
}

#[async_trait]
impl KeySource for JwksUriKeySource {
    async fn current(&self) -> AuthResult<Arc<KeySet>> {
        self.provider.get_keys_from(&self.jwks_uri).await
    }

    async fn refresh(&self, stale: &Arc<KeySet>) -> AuthResult<Arc<KeySet>> {
        self.provider.refresh(&self.jwks_uri, Some(stale)).await
    }
}
