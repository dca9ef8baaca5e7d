//! # tokengate-auth - Bearer Token Verification for OpenID Connect APIs
//!
//! Verifies signed access tokens issued by an OpenID Connect provider and
//! evaluates authorization predicates over their claims. Provider metadata
//! and signing keys are discovered at runtime and cached.
//!
//! ## Key Features
//!
//! - **Discovery** - `/.well-known/openid-configuration` resolution with TTL caching
//! - **Key sets** - JWKS fetching, `kid` lookup and a single refresh on rotation
//! - **Verification** - asymmetric algorithms only; `exp`, `nbf`, `iss` and `aud` checks
//! - **Claim layouts** - Keycloak, Auth0, Zitadel and plain scope/role claims
//! - **Authorization** - scope, role, group and attribute predicates
//! - **Token endpoint** - client credentials, password and refresh grants
//!
//! ## Architecture
//!
//! - [`discovery`] - discovery document fetch and cache
//! - [`jwks`] - key sets, the key-set cache and [`KeySource`] implementations
//! - [`verifier`] - [`TokenVerifier`] and [`VerifiedClaims`]
//! - [`claims`] / [`authz`] - claim layouts and predicate evaluation
//! - [`bearer`] - `Authorization` header parsing
//! - [`guard`] - one configured provider wired end to end
//! - [`grant`] - token endpoint client
//! - [`config`] - file and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokengate_auth::{AuthorizationPredicate, Gate, GateConfig};
//!
//! # async fn run(authorization: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = GateConfig::from_file("tokengate.toml")?;
//! let gate = Gate::from_config(&config)?;
//!
//! let predicate: AuthorizationPredicate = "scope:orders:read".parse()?;
//! match gate.guard("keycloak")?.authorize_request(authorization, &predicate).await {
//!     Ok(claims) => println!("hello {}", claims.subject().unwrap_or("anonymous")),
//!     Err(e) => println!("{} {}", e.status(), e.code()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - verification and key-fetch counters via the `metrics` facade

pub mod auth_metrics;
pub mod authz;
pub mod bearer;
pub mod cache;
pub mod claims;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod grant;
pub mod guard;
pub mod jwks;
pub mod verifier;

#[cfg(test)]
mod test_support;

#[doc(inline)]
pub use authz::{AuthorizationPredicate, Authorizer, PredicateParseError};
#[doc(inline)]
pub use claims::{ClaimExtractor, extractor_for};
#[doc(inline)]
pub use clock::{Clock, ManualClock, SystemClock};
#[doc(inline)]
pub use config::{ClaimsLayout, ConfigError, GateConfig, HttpConfig, ProviderConfig};
#[doc(inline)]
pub use discovery::{DiscoveryDocument, DiscoveryResolver};
#[doc(inline)]
pub use error::{AuthError, AuthResult, ErrorBody, ErrorCategory};
#[doc(inline)]
pub use fetch::{FetchError, HttpFetcher, ReqwestFetcher};
#[doc(inline)]
pub use grant::{GrantError, TokenClient, TokenResponse};
#[doc(inline)]
pub use guard::{Gate, ProviderGuard};
#[doc(inline)]
pub use jwks::{IssuerKeySource, JwksUriKeySource, KeySet, KeySetProvider, KeySource, SigningKey};
#[doc(inline)]
pub use verifier::{TokenVerifier, VerifiedClaims};
