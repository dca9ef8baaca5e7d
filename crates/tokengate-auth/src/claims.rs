//! Provider-specific claim layouts
//!
//! Scopes, roles and groups live in different places depending on who
//! issued the token. A [`ClaimExtractor`] reads them out of
//! [`VerifiedClaims`]; a missing path at any level yields an empty list.

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ClaimsLayout;
use crate::verifier::VerifiedClaims;

/// Reads authorization-relevant claims in one provider's layout
pub trait ClaimExtractor: Send + Sync + Debug {
    /// Granted scopes
    fn scopes(&self, claims: &VerifiedClaims) -> Vec<String> {
        scope_claim(claims)
    }

    /// Granted roles
    fn roles(&self, claims: &VerifiedClaims) -> Vec<String>;

    /// Group memberships
    fn groups(&self, claims: &VerifiedClaims) -> Vec<String> {
        string_list(claims.get("groups"))
    }
}

/// Top-level `scope`/`scp`, `roles` and `groups`
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardClaims;

impl ClaimExtractor for StandardClaims {
    fn roles(&self, claims: &VerifiedClaims) -> Vec<String> {
        string_list(claims.get("roles"))
    }
}

/// Keycloak client roles under `resource_access.<client_id>.roles`
#[derive(Debug, Clone)]
pub struct KeycloakClaims {
    client_id: String,
}

impl KeycloakClaims {
    /// Read roles granted to `client_id`
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl ClaimExtractor for KeycloakClaims {
    fn roles(&self, claims: &VerifiedClaims) -> Vec<String> {
        let roles = claims
            .get("resource_access")
            .and_then(|access| access.get(&self.client_id))
            .and_then(|client| client.get("roles"));
        string_list(roles)
    }
}

/// Auth0 RBAC: roles are the `permissions` array
#[derive(Debug, Clone, Copy, Default)]
pub struct Auth0Claims;

impl ClaimExtractor for Auth0Claims {
    fn roles(&self, claims: &VerifiedClaims) -> Vec<String> {
        string_list(claims.get("permissions"))
    }
}

/// Zitadel project roles: the keys of the project roles object
#[derive(Debug, Clone)]
pub struct ZitadelClaims {
    project_claim: String,
}

const ZITADEL_ROLES: &str = "urn:zitadel:iam:org:project:roles";

impl ZitadelClaims {
    /// Read roles of `project_id`, falling back to the unscoped claim
    pub fn new(project_id: &str) -> Self {
        Self {
            project_claim: format!("urn:zitadel:iam:org:project:{project_id}:roles"),
        }
    }
}

impl ClaimExtractor for ZitadelClaims {
    fn roles(&self, claims: &VerifiedClaims) -> Vec<String> {
        claims
            .get(&self.project_claim)
            .or_else(|| claims.get(ZITADEL_ROLES))
            .and_then(Value::as_object)
            .map(|roles| roles.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Extractor for a configured layout
pub fn extractor_for(layout: &ClaimsLayout) -> Arc<dyn ClaimExtractor> {
    match layout {
        ClaimsLayout::Standard => Arc::new(StandardClaims),
        ClaimsLayout::Keycloak { client_id } => Arc::new(KeycloakClaims::new(client_id.clone())),
        ClaimsLayout::Auth0 => Arc::new(Auth0Claims),
        ClaimsLayout::Zitadel { project_id } => Arc::new(ZitadelClaims::new(project_id)),
    }
}

/// `scope` as space-delimited tokens, else `scp` as an array or string
fn scope_claim(claims: &VerifiedClaims) -> Vec<String> {
    match claims.get("scope").or_else(|| claims.get("scp")) {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        other => string_list(other),
    }
}

/// Strings of a JSON array; anything else is empty
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
