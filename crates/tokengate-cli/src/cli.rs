//! Command-line interface for tokengate
//!
//! Inspect a provider's discovery document and key set, verify tokens
//! against a configured provider, and request tokens from its token
//! endpoint. Results are printed to stdout as pretty JSON.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokengate_auth::{AuthorizationPredicate, HttpConfig};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

use crate::commands;

/// tokengate - OpenID Connect bearer token inspection
#[derive(Parser, Debug)]
#[command(
    name = "tokengate",
    version,
    about = "Inspect OpenID Connect providers and verify bearer tokens",
    long_about = "Resolves provider discovery documents and signing keys, verifies bearer\n\
                  tokens against a configured provider, and evaluates authorization\n\
                  predicates (scope:<n>, role:<n>, group:<n>, attr:<name>=<value>).\n\n\
                  Tokens and secrets passed as flags may end up in shell history;\n\
                  prefer the TOKENGATE_* environment variables.",
    author
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v, -vv, -vvv for trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch and print an issuer's discovery document
    Discover {
        /// Issuer URL
        #[arg(long)]
        issuer: Url,

        #[command(flatten)]
        http: HttpArgs,
    },

    /// Fetch and summarize a signing key set
    Keys {
        #[command(flatten)]
        target: KeysTarget,

        #[command(flatten)]
        http: HttpArgs,
    },

    /// Verify a token against a configured provider
    Verify {
        #[command(flatten)]
        provider: ProviderArgs,

        /// Bearer token to verify
        #[arg(long, env = "TOKENGATE_TOKEN", hide_env_values = true)]
        token: String,

        /// Predicate the claims must satisfy (repeatable)
        #[arg(long = "require", value_name = "PREDICATE")]
        require: Vec<AuthorizationPredicate>,
    },

    /// Request a token from a configured provider's token endpoint
    Token {
        #[command(flatten)]
        provider: ProviderArgs,

        #[command(subcommand)]
        grant: GrantCommand,
    },
}

/// Where `keys` finds the key set
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct KeysTarget {
    /// Issuer whose discovery document names the key set
    #[arg(long)]
    pub issuer: Option<Url>,

    /// Key set URL, skipping discovery
    #[arg(long)]
    pub jwks_uri: Option<Url>,
}

/// HTTP settings for ad-hoc commands
#[derive(Args, Debug)]
pub struct HttpArgs {
    /// Request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Allow plain-HTTP endpoints (local testing only)
    #[arg(long)]
    pub allow_http: bool,
}

impl HttpArgs {
    /// Equivalent library settings
    pub fn to_config(&self) -> HttpConfig {
        HttpConfig {
            request_timeout: Duration::from_secs(self.timeout_secs),
            allow_http: self.allow_http,
            ..HttpConfig::default()
        }
    }
}

/// Provider selection from a config file
#[derive(Args, Debug)]
pub struct ProviderArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', env = "TOKENGATE_CONFIG")]
    pub config: PathBuf,

    /// Provider name from the configuration
    #[arg(long, short = 'p')]
    pub provider: String,
}

/// Token endpoint grants
#[derive(Subcommand, Debug)]
pub enum GrantCommand {
    /// Client-credentials grant
    ClientCredentials {
        /// Scope to request (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },

    /// Resource-owner password grant
    Password {
        /// Username
        #[arg(long)]
        username: String,

        /// Password
        #[arg(long, env = "TOKENGATE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Scope to request (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },

    /// Refresh-token grant
    Refresh {
        /// Refresh token
        #[arg(long, env = "TOKENGATE_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
    },
}

impl Cli {
    /// Execute the parsed command
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or a token is rejected.
    pub async fn execute(self) -> anyhow::Result<()> {
        self.init_tracing();

        match self.command {
            Command::Discover { issuer, http } => {
                commands::discover(&issuer, &http.to_config()).await
            }
            Command::Keys { target, http } => commands::keys(&target, &http.to_config()).await,
            Command::Verify {
                provider,
                token,
                require,
            } => commands::verify(&provider, &token, &require).await,
            Command::Token { provider, grant } => commands::token(&provider, grant).await,
        }
    }

    /// Level selected by `-v`/`--quiet`
    fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            }
        }
    }

    /// Initialize tracing subscriber; `RUST_LOG` overrides the verbosity flags
    fn init_tracing(&self) {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.log_level()).into())
            .from_env_lossy();

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
