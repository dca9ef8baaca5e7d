//! Authorization predicates over verified claims
//!
//! Evaluation is pure: no I/O, claims are never mutated, and a missing claim
//! is a denial rather than an error.
//!
//! ```rust
//! use tokengate_auth::authz::AuthorizationPredicate;
//!
//! let predicate: AuthorizationPredicate = "role:orders-admin".parse().unwrap();
//! assert_eq!(predicate, AuthorizationPredicate::Role("orders-admin".into()));
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::claims::{ClaimExtractor, StandardClaims};
use crate::error::{AuthError, AuthResult};
use crate::verifier::VerifiedClaims;

/// A condition on a caller's claims
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationPredicate {
    /// Scope is granted
    Scope(String),
    /// Role is granted, read through the provider's claim layout
    Role(String),
    /// Caller belongs to the group
    Group(String),
    /// Top-level claim equals the value exactly
    Attribute {
        /// Claim name
        name: String,
        /// Expected value
        value: Value,
    },
    /// Every member holds; empty is true
    AllOf(Vec<AuthorizationPredicate>),
}

impl AuthorizationPredicate {
    /// Attribute check
    pub fn attribute(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for AuthorizationPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scope(name) => write!(f, "scope:{name}"),
            Self::Role(name) => write!(f, "role:{name}"),
            Self::Group(name) => write!(f, "group:{name}"),
            // Bare only when it would not re-parse as some other JSON value
            Self::Attribute { name, value } => match value {
                Value::String(s) if serde_json::from_str::<Value>(s).is_err() => {
                    write!(f, "attr:{name}={s}")
                }
                other => write!(f, "attr:{name}={other}"),
            },
            Self::AllOf(members) => {
                write!(f, "all(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Text form that did not parse
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PredicateParseError {
    /// No `kind:` prefix
    #[error("predicate '{0}' must look like scope:<name>, role:<name>, group:<name> or attr:<name>=<value>")]
    MissingKind(String),
    /// Unknown prefix
    #[error("unknown predicate kind '{0}'")]
    UnknownKind(String),
    /// Empty name
    #[error("predicate '{0}' has an empty name")]
    EmptyName(String),
    /// `attr:` without `=`
    #[error("attribute predicate '{0}' must look like attr:<name>=<value>")]
    MissingValue(String),
}

impl FromStr for AuthorizationPredicate {
    type Err = PredicateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| PredicateParseError::MissingKind(s.to_string()))?;

        if kind == "attr" {
            let (name, raw) = rest
                .split_once('=')
                .ok_or_else(|| PredicateParseError::MissingValue(s.to_string()))?;
            if name.is_empty() {
                return Err(PredicateParseError::EmptyName(s.to_string()));
            }
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            return Ok(Self::attribute(name, value));
        }

        if rest.is_empty() {
            return Err(PredicateParseError::EmptyName(s.to_string()));
        }
        match kind {
            "scope" => Ok(Self::Scope(rest.to_string())),
            "role" => Ok(Self::Role(rest.to_string())),
            "group" => Ok(Self::Group(rest.to_string())),
            other => Err(PredicateParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Evaluates predicates using one provider's claim layout
#[derive(Debug, Clone)]
pub struct Authorizer {
    extractor: Arc<dyn ClaimExtractor>,
}

impl Default for Authorizer {
    fn default() -> Self {
        Self::new(Arc::new(StandardClaims))
    }
}

impl Authorizer {
    /// Authorizer reading claims through `extractor`
    pub fn new(extractor: Arc<dyn ClaimExtractor>) -> Self {
        Self { extractor }
    }

    /// Whether `claims` satisfy `predicate`
    pub fn authorize(&self, claims: &VerifiedClaims, predicate: &AuthorizationPredicate) -> bool {
        let granted = match predicate {
            AuthorizationPredicate::Scope(name) => {
                self.extractor.scopes(claims).iter().any(|s| s == name)
            }
            AuthorizationPredicate::Role(name) => {
                self.extractor.roles(claims).iter().any(|r| r == name)
            }
            AuthorizationPredicate::Group(name) => {
                self.extractor.groups(claims).iter().any(|g| g == name)
            }
            AuthorizationPredicate::Attribute { name, value } => claims.get(name) == Some(value),
            AuthorizationPredicate::AllOf(members) => {
                members.iter().all(|member| self.authorize(claims, member))
            }
        };

        if !granted {
            debug!(
                predicate = %predicate,
                sub = claims.subject().unwrap_or_default(),
                "Authorization predicate not satisfied"
            );
        }
        granted
    }

    /// Like [`Authorizer::authorize`], but a denial is an error
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthorizationDenied`] when the predicate is false.
    pub fn require(
        &self,
        claims: &VerifiedClaims,
        predicate: &AuthorizationPredicate,
    ) -> AuthResult<()> {
        if self.authorize(claims, predicate) {
            Ok(())
        } else {
            Err(AuthError::AuthorizationDenied(predicate.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::KeycloakClaims;
    use proptest::prelude::*;
    use serde_json::json;

    fn claims(value: Value) -> VerifiedClaims {
        match value {
            Value::Object(map) => VerifiedClaims::new(map),
            _ => unreachable!("test claims must be an object"),
        }
    }

    fn keycloak_claims() -> VerifiedClaims {
        claims(json!({
            "sub": "u1",
            "scope": "openid orders:read",
            "groups": ["/staff"],
            "tenant": "acme",
            "level": 3,
            "resource_access": {"orders-api": {"roles": ["orders-admin"]}},
        }))
    }

    #[test]
    fn test_scope_role_group_attribute() {
        let authz = Authorizer::new(Arc::new(KeycloakClaims::new("orders-api")));
        let c = keycloak_claims();

        assert!(authz.authorize(&c, &AuthorizationPredicate::Scope("orders:read".into())));
        assert!(!authz.authorize(&c, &AuthorizationPredicate::Scope("orders".into())));
        assert!(authz.authorize(&c, &AuthorizationPredicate::Role("orders-admin".into())));
        assert!(!authz.authorize(&c, &AuthorizationPredicate::Role("billing-admin".into())));
        assert!(authz.authorize(&c, &AuthorizationPredicate::Group("/staff".into())));
        assert!(authz.authorize(&c, &AuthorizationPredicate::attribute("tenant", "acme")));
        assert!(authz.authorize(&c, &AuthorizationPredicate::attribute("level", 3)));
        assert!(!authz.authorize(&c, &AuthorizationPredicate::attribute("level", "3")));
        assert!(!authz.authorize(&c, &AuthorizationPredicate::attribute("missing", "x")));
    }

    #[test]
    fn test_missing_structure_denies() {
        let authz = Authorizer::new(Arc::new(KeycloakClaims::new("orders-api")));
        let c = claims(json!({"sub": "u1", "resource_access": {"orders-api": null}}));

        assert!(!authz.authorize(&c, &AuthorizationPredicate::Role("orders-admin".into())));
        assert!(!authz.authorize(&c, &AuthorizationPredicate::Group("/staff".into())));
        assert!(!authz.authorize(&c, &AuthorizationPredicate::Scope("openid".into())));
    }

    #[test]
    fn test_all_of() {
        let authz = Authorizer::new(Arc::new(KeycloakClaims::new("orders-api")));
        let c = keycloak_claims();

        let both = AuthorizationPredicate::AllOf(vec![
            AuthorizationPredicate::Scope("openid".into()),
            AuthorizationPredicate::Role("orders-admin".into()),
        ]);
        assert!(authz.authorize(&c, &both));

        let one_missing = AuthorizationPredicate::AllOf(vec![
            AuthorizationPredicate::Scope("openid".into()),
            AuthorizationPredicate::Scope("orders:write".into()),
        ]);
        assert!(!authz.authorize(&c, &one_missing));
        assert!(authz.authorize(&c, &AuthorizationPredicate::AllOf(vec![])));
    }

    #[test]
    fn test_require_maps_denial() {
        let authz = Authorizer::default();
        let c = claims(json!({"scope": "a"}));

        assert!(authz.require(&c, &AuthorizationPredicate::Scope("a".into())).is_ok());
        let err = authz
            .require(&c, &AuthorizationPredicate::Scope("b".into()))
            .unwrap_err();
        assert_eq!(err, AuthError::AuthorizationDenied("scope:b".into()));
        assert_eq!(err.status(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_parse_predicates() {
        assert_eq!(
            "scope:orders:read".parse(),
            Ok(AuthorizationPredicate::Scope("orders:read".into()))
        );
        assert_eq!(
            "group:/staff".parse(),
            Ok(AuthorizationPredicate::Group("/staff".into()))
        );
        assert_eq!(
            "attr:level=3".parse(),
            Ok(AuthorizationPredicate::attribute("level", 3))
        );
        assert_eq!(
            "attr:tenant=acme".parse(),
            Ok(AuthorizationPredicate::attribute("tenant", "acme"))
        );
        assert_eq!(
            "attr:email_verified=true".parse(),
            Ok(AuthorizationPredicate::attribute("email_verified", true))
        );

        assert!(matches!(
            "admin".parse::<AuthorizationPredicate>(),
            Err(PredicateParseError::MissingKind(_))
        ));
        assert!(matches!(
            "perm:x".parse::<AuthorizationPredicate>(),
            Err(PredicateParseError::UnknownKind(_))
        ));
        assert!(matches!(
            "role:".parse::<AuthorizationPredicate>(),
            Err(PredicateParseError::EmptyName(_))
        ));
        assert!(matches!(
            "attr:tenant".parse::<AuthorizationPredicate>(),
            Err(PredicateParseError::MissingValue(_))
        ));
    }

    #[test]
    fn test_display_round_trips_simple_forms() {
        for text in ["scope:a", "role:b", "group:/c", "attr:tenant=acme", "attr:level=3"] {
            let predicate: AuthorizationPredicate = text.parse().unwrap();
            assert_eq!(predicate.to_string(), text);
        }
    }

    #[test]
    fn test_display_quotes_json_like_strings() {
        for value in ["3", "true", "null", "[1]"] {
            let predicate = AuthorizationPredicate::attribute("code", value);
            let text = predicate.to_string();
            assert_eq!(text, format!("attr:code=\"{value}\""));
            assert_eq!(text.parse(), Ok(predicate));
        }

        let c = claims(json!({"code": 3}));
        let err = Authorizer::default()
            .require(&c, &AuthorizationPredicate::attribute("code", "3"))
            .unwrap_err();
        assert_eq!(err, AuthError::AuthorizationDenied("attr:code=\"3\"".into()));
    }

    proptest! {
        #[test]
        fn prop_scope_membership_matches_tokens(
            tokens in prop::collection::vec("[a-z:._-]{1,12}", 0..8),
            wanted in "[a-z:._-]{1,12}",
        ) {
            let c = claims(json!({"scope": tokens.join(" ")}));
            let expected = tokens.contains(&wanted);
            let granted = Authorizer::default()
                .authorize(&c, &AuthorizationPredicate::Scope(wanted.clone()));
            prop_assert_eq!(granted, expected);
        }
    }
}
