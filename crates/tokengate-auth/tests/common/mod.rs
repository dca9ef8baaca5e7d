//! Common test utilities for integration tests
//!
//! A mock identity provider on wiremock, fixed signing keys, and helpers to
//! mint tokens and build guards against the mock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokengate_auth::{
    ClaimsLayout, HttpConfig, ManualClock, ProviderConfig, ProviderGuard, ReqwestFetcher,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const PRIMARY_PEM: &str = include_str!("../fixtures/primary.pem");
pub const ROTATED_PEM: &str = include_str!("../fixtures/rotated.pem");
pub const EC_PEM: &str = include_str!("../fixtures/ec.pem");

pub const PRIMARY_N: &str = "x7ysRT81QdRaImFkOfCpjUA80yThQ2dDfwbIov5DGIaZlMmPYbuDjCGORwawxZJTwOxk46Fbn6UfLI0T3nKbUsjigXHeQrOIiI_NlSbTBMvxJDQLjphOzdaCZgOEWS5WVesiucVhQOXm4Og7uP-rsM1jDH-uhs1o4lZowBN9ZDf49Ydw_kEL9elMMW-_5hmhi7aGB7hRVPxMkFhFhbZ69BCB5-FUQ8gwkeIVcJgzJaTwFsckk0-d9QI_cOSUQ5NRMZei3xDUzLnXrSo6s1670rtDD-iaUTVR-5GEvzIxm2ChwUoAR858bDwRgOY57JnJ0JjOBqFRl8uTNRNxgLB-ww";
pub const ROTATED_N: &str = "rcb_FxzmGRnhTTAtYjKIvLADaHnGy9uBNp4UBkp8XCrzxFMVnWXGpu0ZtYSDCRTUiXPiFcSYOq3BcXxKHBFvxcFAzBUQ4kKZ9BLmGpyrjJZMGYeeoQplG5Nkl36DLeD_r3hFD9MdcvPdtS0gEtLaijDSmWgsZSuVxcuFIK3QB9DgrbfFlEMos1TLLJvKSeCo43rkC-f6746fahgshf_oKpWnSpYVonZB-GpBzzM_OSYRvh3YyhRgdBYsyB9XHEC3wGKCduSadw_bGACbYroFNNNWXeoEP6KpFX2JfxcjYjuOh0VH0sLDBJThl1gHFAgiA7Ct2o7o55r66c86bolFJQ";
pub const EC_X: &str = "rwYZo8MY5n9Wy2VVQkCydFKoR554gMlO56gd0OR0b7A";
pub const EC_Y: &str = "VUxYTWvsoqwpIF3cSjbf5nHeI851eMcpf_Ax9Cx_Fns";

/// Fixed "now" for the manual clock
pub const NOW: u64 = 1_700_000_000;
pub const AUDIENCE: &str = "orders-api";

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/protocol/openid-connect/certs";
pub const TOKEN_PATH: &str = "/protocol/openid-connect/token";

/// RSA public JWK for one of the fixture keys
pub fn rsa_jwk(kid: &str, n: &str) -> Value {
    json!({"kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": n, "e": "AQAB"})
}

/// P-256 public JWK for the EC fixture
pub fn ec_jwk(kid: &str) -> Value {
    json!({
        "kty": "EC",
        "kid": kid,
        "use": "sig",
        "alg": "ES256",
        "crv": "P-256",
        "x": EC_X,
        "y": EC_Y,
    })
}

/// Mock identity provider serving discovery and key-set documents
pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    /// Start an empty mock provider
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer URL, exactly as it appears in `iss`
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}{JWKS_PATH}", self.server.uri())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.server.uri())
    }

    /// Serve a discovery document pointing at this server's endpoints
    pub async fn mock_discovery(&self) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer(),
                "jwks_uri": self.jwks_uri(),
                "token_endpoint": self.token_endpoint(),
                "authorization_endpoint": format!("{}/protocol/openid-connect/auth", self.issuer()),
                "grant_types_supported": ["client_credentials", "password", "refresh_token"],
                "id_token_signing_alg_values_supported": ["RS256", "ES256"],
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer discovery with `status` and an empty body
    pub async fn mock_discovery_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` as the key set
    pub async fn mock_jwks(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Serve `first` for one request, then `then` for every later one
    pub async fn mock_jwks_rotation(&self, first: Vec<Value>, then: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": first })))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
        self.mock_jwks(then).await;
    }

    /// Requests received on `request_path` so far
    pub async fn hits(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }
}

/// Plain-HTTP settings for talking to the mock
pub fn http_config() -> HttpConfig {
    HttpConfig {
        request_timeout: Duration::from_secs(2),
        allow_http: true,
        ..HttpConfig::default()
    }
}

/// Provider settings for the mock, Keycloak claim layout
pub fn provider_config(idp: &MockIdp) -> ProviderConfig {
    let mut provider = ProviderConfig::new("keycloak", idp.issuer(), AUDIENCE);
    provider.claims = ClaimsLayout::Keycloak {
        client_id: AUDIENCE.to_string(),
    };
    provider
}

/// Guard for `provider` using a real HTTP fetcher and a manual clock
pub fn guard_with(
    provider: &ProviderConfig,
    http: &HttpConfig,
    clock: Arc<ManualClock>,
) -> ProviderGuard {
    let fetcher = Arc::new(ReqwestFetcher::new(http).expect("HTTP client"));
    ProviderGuard::new(provider, http, fetcher, clock).expect("valid provider")
}

/// Guard for the mock provider with default test settings
pub fn guard(idp: &MockIdp, clock: Arc<ManualClock>) -> ProviderGuard {
    guard_with(&provider_config(idp), &http_config(), clock)
}

/// Claims accepted by [`guard`]: right issuer and audience, expiring in a minute
pub fn valid_claims(idp: &MockIdp) -> Value {
    json!({
        "sub": "user-1",
        "iss": idp.issuer(),
        "aud": [AUDIENCE, "account"],
        "exp": NOW + 60,
        "iat": NOW,
        "scope": "openid orders:read",
        "groups": ["/staff"],
        "resource_access": {AUDIENCE: {"roles": ["orders-admin"]}},
    })
}

/// Sign `claims` with an RSA fixture key
pub fn sign_rs256(pem: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    header.typ = Some("JWT".to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("Invalid RSA key");
    encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Sign `claims` with the EC fixture key
pub fn sign_es256(kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_ec_pem(EC_PEM.as_bytes()).expect("Invalid EC key");
    encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Token with an arbitrary header and no real signature
pub fn unsigned_token(header: &Value, claims: &Value) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("header json")),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims json")),
        URL_SAFE_NO_PAD.encode(b"not-a-signature"),
    )
}
