//! Provider and HTTP configuration
//!
//! A [`GateConfig`] lists one or more identity providers. Each provider
//! pins an issuer, an audience and an asymmetric algorithm allow-list; the
//! shared [`HttpConfig`] bounds every outbound fetch.
//!
//! ```toml
//! [http]
//! request_timeout = "5s"
//!
//! [[providers]]
//! name = "keycloak"
//! issuer = "https://sso.example.com/realms/acme"
//! audience = "orders-api"
//! cache_ttl = "10m"
//!
//! [providers.claims]
//! kind = "keycloak"
//! client_id = "orders-api"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::verifier::DEFAULT_ALGORITHMS;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Semantically invalid configuration
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// No provider with the requested name
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Outbound HTTP settings shared by discovery, key-set and token calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound for a single fetch, connection included
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Largest accepted response body in bytes
    pub max_response_size: usize,
    /// Permit plain `http://` URLs (local development only)
    pub allow_http: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

/// Where a provider puts scopes, roles and groups inside its tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimsLayout {
    /// `scope`/`scp`, `roles`, `groups` at the top level
    #[default]
    Standard,
    /// Client roles under `resource_access.<client_id>.roles`
    Keycloak {
        /// Client whose roles are read
        client_id: String,
    },
    /// Roles from the `permissions` array
    Auth0,
    /// Roles from the project roles claim, keyed by role name
    Zitadel {
        /// Project whose roles are read; the unscoped claim is the fallback
        project_id: String,
    },
}

/// One trusted identity provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Name used to select the provider
    pub name: String,
    /// Expected `iss`, compared exactly; also the discovery base URL
    pub issuer: String,
    /// Expected entry in `aud`
    pub audience: String,
    /// Known key-set URL; when set, discovery is skipped for key lookups
    #[serde(default)]
    pub jwks_uri: Option<Url>,
    /// Client id for token grants
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret for token grants
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Claim layout used by authorization
    #[serde(default)]
    pub claims: ClaimsLayout,
    /// Accepted signing algorithms
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,
    /// Key-set cache lifetime
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Discovery document cache lifetime
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub discovery_ttl: Duration,
    /// Tolerance applied to `exp` and `nbf`
    #[serde(default, with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Minimum spacing between forced key-set refreshes
    ///
    /// Defaults to zero so a rotated key is picked up by the very next
    /// token. With zero, every token carrying an unknown `kid` costs one
    /// outbound key-set fetch (concurrent ones share it); set a few seconds
    /// to cap that traffic, at the price of rejecting tokens signed with a
    /// new key until the interval has passed.
    #[serde(default, with = "humantime_serde")]
    pub min_refresh_interval: Duration,
}

fn default_algorithms() -> Vec<Algorithm> {
    DEFAULT_ALGORITHMS.to_vec()
}

fn default_ttl() -> Duration {
    Duration::from_secs(600)
}

fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

impl ProviderConfig {
    /// Provider with default TTLs, algorithms and standard claim layout
    pub fn new(
        name: impl Into<String>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_uri: None,
            client_id: None,
            client_secret: None,
            claims: ClaimsLayout::default(),
            allowed_algorithms: default_algorithms(),
            cache_ttl: default_ttl(),
            discovery_ttl: default_ttl(),
            clock_skew: Duration::ZERO,
            min_refresh_interval: Duration::ZERO,
        }
    }

    /// Check the provider's settings
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty name or audience, an
    /// issuer that is not a URL, a zero TTL, or an empty or symmetric
    /// algorithm list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider name must not be empty".into()));
        }
        self.issuer_url()?;
        if self.audience.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "provider '{}': audience must not be empty",
                self.name
            )));
        }
        if self.cache_ttl.is_zero() || self.discovery_ttl.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "provider '{}': cache TTLs must be greater than zero",
                self.name
            )));
        }
        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "provider '{}': allowed_algorithms must not be empty",
                self.name
            )));
        }
        if let Some(alg) = self.allowed_algorithms.iter().copied().find(|a| is_symmetric(*a)) {
            return Err(ConfigError::Invalid(format!(
                "provider '{}': symmetric algorithm {alg:?} is not supported",
                self.name
            )));
        }
        Ok(())
    }

    /// The issuer parsed as a URL, for discovery
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the issuer is not an absolute URL.
    pub fn issuer_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.issuer).map_err(|e| {
            ConfigError::Invalid(format!(
                "provider '{}': issuer '{}' is not a URL: {e}",
                self.name, self.issuer
            ))
        })
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateConfig {
    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Trusted providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl GateConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The format is picked from the extension. Environment variables with
    /// the `TOKENGATE_` prefix override file settings, with `__` separating
    /// nested keys (`TOKENGATE_HTTP__REQUEST_TIMEOUT=3s`).
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tokengate_auth::config::GateConfig;
    ///
    /// let config = GateConfig::from_file("tokengate.toml").expect("Failed to load config");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, its format is unsupported,
    /// it fails to parse, or [`GateConfig::validate`] rejects it.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, "TOKENGATE")
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`GateConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<std::path::Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every provider and reject duplicate names
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no providers are configured,
    /// names collide, or any provider fails [`ProviderConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("at least one provider is required".into()));
        }
        if self.http.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "http.request_timeout must be greater than zero".into(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a provider by name
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProvider`] if no provider has that name.
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig, ConfigError> {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }
}
