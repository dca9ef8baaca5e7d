//! Request-level entry points
//!
//! A [`ProviderGuard`] wires one configured provider end to end: discovery,
//! key set, verifier and authorizer. A [`Gate`] holds one guard per
//! configured provider and shares an HTTP client between them.

use std::sync::Arc;

use tracing::debug;

use crate::auth_metrics;
use crate::authz::{AuthorizationPredicate, Authorizer};
use crate::bearer;
use crate::claims::extractor_for;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, GateConfig, HttpConfig, ProviderConfig};
use crate::discovery::{DiscoveryDocument, DiscoveryResolver};
use crate::error::AuthResult;
use crate::fetch::{HttpFetcher, ReqwestFetcher};
use crate::grant::{GrantError, TokenClient};
use crate::jwks::{IssuerKeySource, JwksUriKeySource, KeySetProvider, KeySource};
use crate::verifier::{TokenVerifier, VerifiedClaims};

/// Verification and authorization for one provider
#[derive(Debug)]
pub struct ProviderGuard {
    config: ProviderConfig,
    resolver: Arc<DiscoveryResolver>,
    keys: Arc<KeySetProvider>,
    verifier: TokenVerifier,
    authorizer: Authorizer,
}

impl ProviderGuard {
    /// Build a guard for `config`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the provider settings are invalid.
    pub fn new(
        config: &ProviderConfig,
        http: &HttpConfig,
        fetcher: Arc<dyn HttpFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let issuer = config.issuer_url()?;

        let resolver = Arc::new(
            DiscoveryResolver::new(Arc::clone(&fetcher), config.discovery_ttl, Arc::clone(&clock))
                .with_fetch_timeout(http.request_timeout),
        );
        let keys = Arc::new(
            KeySetProvider::new(fetcher, config.cache_ttl, Arc::clone(&clock))
                .with_fetch_timeout(http.request_timeout)
                .with_min_refresh_interval(config.min_refresh_interval),
        );

        let source: Arc<dyn KeySource> = match &config.jwks_uri {
            Some(jwks_uri) => Arc::new(JwksUriKeySource::new(jwks_uri.clone(), Arc::clone(&keys))),
            None => Arc::new(IssuerKeySource::new(
                issuer,
                Arc::clone(&resolver),
                Arc::clone(&keys),
            )),
        };

        let verifier = TokenVerifier::new(source, clock)
            .with_allowed_algorithms(config.allowed_algorithms.iter().copied())
            .with_clock_skew(config.clock_skew);

        Ok(Self {
            config: config.clone(),
            resolver,
            keys,
            verifier,
            authorizer: Authorizer::new(extractor_for(&config.claims)),
        })
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Provider settings
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Shared key-set provider
    pub fn keys(&self) -> &Arc<KeySetProvider> {
        &self.keys
    }

    /// Authorizer using this provider's claim layout
    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// The provider's discovery document
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DiscoveryUnavailable`](crate::AuthError::DiscoveryUnavailable)
    /// or [`AuthError::DiscoveryMalformed`](crate::AuthError::DiscoveryMalformed).
    pub async fn discovery(&self) -> AuthResult<Arc<DiscoveryDocument>> {
        let issuer = self.config.issuer_url().map_err(|e| crate::AuthError::DiscoveryMalformed {
            url: self.config.issuer.clone(),
            reason: e.to_string(),
        })?;
        self.resolver.resolve(&issuer).await
    }

    /// Verify a raw token against this provider's issuer and audience
    ///
    /// # Errors
    ///
    /// Any verification [`AuthError`](crate::AuthError).
    pub async fn authenticate(&self, token: &str) -> AuthResult<VerifiedClaims> {
        let result = self
            .verifier
            .verify(token, &self.config.issuer, &self.config.audience)
            .await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        auth_metrics::record_verification(&self.config.name, outcome);
        result
    }

    /// Verify the token in an `Authorization` header value
    ///
    /// # Errors
    ///
    /// Header errors from [`bearer::parse_authorization`], then any
    /// verification error.
    pub async fn authenticate_header(
        &self,
        authorization: Option<&str>,
    ) -> AuthResult<VerifiedClaims> {
        let token = bearer::parse_authorization(authorization)?;
        self.authenticate(token).await
    }

    /// Verify the header's token and require `predicate`
    ///
    /// # Errors
    ///
    /// Any verification error (401), or
    /// [`AuthError::AuthorizationDenied`](crate::AuthError::AuthorizationDenied)
    /// (403) if the claims do not satisfy `predicate`.
    pub async fn authorize_request(
        &self,
        authorization: Option<&str>,
        predicate: &AuthorizationPredicate,
    ) -> AuthResult<VerifiedClaims> {
        let claims = self.authenticate_header(authorization).await?;
        self.authorizer.require(&claims, predicate)?;
        debug!(provider = %self.config.name, predicate = %predicate, "Request authorized");
        Ok(claims)
    }

    /// Token endpoint client for this provider's configured client
    ///
    /// # Errors
    ///
    /// [`GrantError::Transport`] when no `client_id` is configured or
    /// discovery fails, [`GrantError::NoTokenEndpoint`] when the provider
    /// advertises none.
    pub async fn token_client(&self, http: reqwest::Client) -> Result<TokenClient, GrantError> {
        let client_id = self.config.client_id.clone().ok_or_else(|| {
            GrantError::Transport(format!("provider '{}' has no client_id", self.config.name))
        })?;
        let discovery = self
            .discovery()
            .await
            .map_err(|e| GrantError::Transport(e.to_string()))?;
        TokenClient::from_discovery(http, &discovery, client_id, self.config.client_secret.clone())
    }
}

/// Guards for every configured provider
#[derive(Debug)]
pub struct Gate {
    fetcher: Arc<ReqwestFetcher>,
    guards: Vec<ProviderGuard>,
}

impl Gate {
    /// Build guards for every provider, using the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &GateConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build guards with an explicit clock
    ///
    /// # Errors
    ///
    /// Same as [`Gate::from_config`].
    pub fn with_clock(config: &GateConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let fetcher = Arc::new(
            ReqwestFetcher::new(&config.http)
                .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?,
        );

        let guards = config
            .providers
            .iter()
            .map(|p| {
                ProviderGuard::new(
                    p,
                    &config.http,
                    Arc::clone(&fetcher) as Arc<dyn HttpFetcher>,
                    Arc::clone(&clock),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { fetcher, guards })
    }

    /// Guard for the named provider
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProvider`] if no provider has that name.
    pub fn guard(&self, name: &str) -> Result<&ProviderGuard, ConfigError> {
        self.guards
            .iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }

    /// Every guard, in configuration order
    pub fn guards(&self) -> &[ProviderGuard] {
        &self.guards
    }

    /// HTTP client shared with token endpoint calls
    pub fn http_client(&self) -> reqwest::Client {
        self.fetcher.client().clone()
    }
}
