//! Token endpoint grants
//!
//! [`TokenClient`] obtains tokens from a provider's token endpoint with the
//! client-credentials, resource-owner password and refresh-token grants. The
//! client authenticates by posting its id and secret in the form body.

use std::fmt;

use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::discovery::DiscoveryDocument;

/// Token endpoint failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrantError {
    /// The discovery document names no token endpoint
    #[error("Provider does not advertise a token endpoint")]
    NoTokenEndpoint,

    /// The endpoint answered with an OAuth error
    #[error("Token endpoint returned {status}: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Endpoint {
        /// HTTP status
        status: u16,
        /// OAuth `error` code, or `http_error` if the body had none
        error: String,
        /// OAuth `error_description`
        description: Option<String>,
    },

    /// Connection, TLS or protocol failure
    #[error("Token request failed: {0}")]
    Transport(String),

    /// 2xx body that is not a token response
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

/// Successful token endpoint response
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Usually `Bearer`
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Refresh token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
    /// OpenID Connect ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Granted scopes, space-delimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for one provider's token endpoint
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_endpoint: Url,
    client_id: String,
    client_secret: Option<SecretString>,
}

impl fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClient")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    /// Client posting to `token_endpoint`
    pub fn new(
        http: reqwest::Client,
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            token_endpoint,
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Client for the token endpoint a discovery document advertises
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::NoTokenEndpoint`] if the document has none.
    pub fn from_discovery(
        http: reqwest::Client,
        discovery: &DiscoveryDocument,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
    ) -> Result<Self, GrantError> {
        let endpoint = discovery
            .token_endpoint
            .clone()
            .ok_or(GrantError::NoTokenEndpoint)?;
        Ok(Self::new(http, endpoint, client_id, client_secret))
    }

    /// Token endpoint in use
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Client-credentials grant
    ///
    /// # Errors
    ///
    /// Returns [`GrantError`] on transport failure, an OAuth error response,
    /// or an unreadable body.
    pub async fn client_credentials(&self, scopes: &[String]) -> Result<TokenResponse, GrantError> {
        let mut params = Vec::new();
        push_scope(&mut params, scopes);
        self.request("client_credentials", params).await
    }

    /// Resource-owner password grant
    ///
    /// # Errors
    ///
    /// Same as [`TokenClient::client_credentials`].
    pub async fn password(
        &self,
        username: &str,
        password: &SecretString,
        scopes: &[String],
    ) -> Result<TokenResponse, GrantError> {
        let mut params = vec![
            ("username", username.to_string()),
            ("password", password.expose_secret().clone()),
        ];
        push_scope(&mut params, scopes);
        self.request("password", params).await
    }

    /// Refresh-token grant
    ///
    /// # Errors
    ///
    /// Same as [`TokenClient::client_credentials`].
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse, GrantError> {
        let params = vec![("refresh_token", refresh_token.expose_secret().clone())];
        self.request("refresh_token", params).await
    }

    async fn request(
        &self,
        grant_type: &'static str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<TokenResponse, GrantError> {
        params.push(("grant_type", grant_type.to_string()));
        params.push(("client_id", self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.expose_secret().clone()));
        }

        info!(
            token_endpoint = %self.token_endpoint,
            grant_type = grant_type,
            client_id = %self.client_id,
            "Requesting token"
        );

        let response = self
            .http
            .post(self.token_endpoint.as_str())
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(token_endpoint = %self.token_endpoint, error = %e, "Token request failed");
                GrantError::Transport(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GrantError::Transport(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let (error, description) = match serde_json::from_slice::<OAuthErrorBody>(&body) {
                Ok(oauth) => (oauth.error, oauth.error_description),
                Err(_) => ("http_error".to_string(), None),
            };
            error!(
                token_endpoint = %self.token_endpoint,
                status = status.as_u16(),
                error = %error,
                "Token endpoint rejected grant"
            );
            return Err(GrantError::Endpoint {
                status: status.as_u16(),
                error,
                description,
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| GrantError::InvalidResponse(e.to_string()))?;
        debug!(
            grant_type = grant_type,
            expires_in = token.expires_in,
            "Token issued"
        );
        Ok(token)
    }
}

fn push_scope(params: &mut Vec<(&'static str, String)>, scopes: &[String]) {
    if !scopes.is_empty() {
        params.push(("scope", scopes.join(" ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TokenClient {
        TokenClient::new(
            reqwest::Client::new(),
            Url::parse(&format!("{}/token", server.uri())).unwrap(),
            "orders-cli",
            Some(SecretString::new("s3cret".to_string())),
        )
    }

    #[tokio::test]
    async fn test_client_credentials_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=orders-cli"))
            .and(body_string_contains("client_secret=s3cret"))
            .and(body_string_contains("scope=orders%3Aread+openid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .client_credentials(&["orders:read".to_string(), "openid".to_string()])
            .await
            .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.expires_in, Some(300));
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_password_and_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 300,
                "refresh_token": "rt",
                "refresh_expires_in": 1800,
                "id_token": "it",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at2",
                "refresh_token": "rt2",
                "expires_in": 300,
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let token = client
            .password("alice", &SecretString::new("pw".to_string()), &[])
            .await
            .unwrap();
        assert_eq!(token.refresh_expires_in, Some(1800));
        assert_eq!(token.id_token.as_deref(), Some("it"));

        let refreshed = client
            .refresh(&SecretString::new("rt".to_string()))
            .await
            .unwrap();
        assert_eq!(refreshed.access_token, "at2");
        assert_eq!(refreshed.token_type, "Bearer");
    }

    #[tokio::test]
    async fn test_oauth_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "unauthorized_client",
                "error_description": "Invalid client secret",
            })))
            .mount(&server)
            .await;

        let err = client(&server).client_credentials(&[]).await.unwrap_err();
        assert_eq!(
            err,
            GrantError::Endpoint {
                status: 401,
                error: "unauthorized_client".into(),
                description: Some("Invalid client secret".into()),
            }
        );
        assert_eq!(
            err.to_string(),
            "Token endpoint returned 401: unauthorized_client (Invalid client secret)"
        );
    }

    #[tokio::test]
    async fn test_non_json_error_and_bad_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.client_credentials(&[]).await.unwrap_err();
        assert!(matches!(
            err,
            GrantError::Endpoint { status: 502, ref error, .. } if error == "http_error"
        ));

        let err = client
            .refresh(&SecretString::new("rt".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::InvalidResponse(_)));
    }

    #[test]
    fn test_from_discovery_requires_token_endpoint() {
        let doc = DiscoveryDocument {
            issuer: "https://idp.example.com".into(),
            jwks_uri: Url::parse("https://idp.example.com/jwks").unwrap(),
            token_endpoint: None,
            authorization_endpoint: None,
            userinfo_endpoint: None,
            end_session_endpoint: None,
            introspection_endpoint: None,
            scopes_supported: vec![],
            grant_types_supported: vec![],
            id_token_signing_alg_values_supported: vec![],
        };
        let err = TokenClient::from_discovery(reqwest::Client::new(), &doc, "c", None).unwrap_err();
        assert_eq!(err, GrantError::NoTokenEndpoint);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = TokenResponse {
            access_token: "secret-at".into(),
            token_type: "Bearer".into(),
            expires_in: Some(60),
            refresh_token: Some("secret-rt".into()),
            refresh_expires_in: None,
            id_token: None,
            scope: None,
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("secret-at"));
        assert!(!rendered.contains("secret-rt"));
    }
}
