//! Command implementations

use std::sync::Arc;

use anyhow::{Context, bail};
use secrecy::SecretString;
use serde_json::json;
use tokengate_auth::{
    AuthorizationPredicate, DiscoveryResolver, Gate, GateConfig, HttpConfig, IssuerKeySource,
    KeySetProvider, KeySource, ReqwestFetcher, SystemClock,
};
use tracing::info;
use url::Url;

use crate::cli::{GrantCommand, KeysTarget, ProviderArgs};

/// TTL for the single-use caches of ad-hoc commands
const ONE_SHOT_TTL: std::time::Duration = std::time::Duration::from_secs(60);

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parts(http: &HttpConfig) -> anyhow::Result<(Arc<DiscoveryResolver>, Arc<KeySetProvider>)> {
    let fetcher = Arc::new(ReqwestFetcher::new(http)?);
    let clock = Arc::new(SystemClock);
    let resolver = DiscoveryResolver::new(fetcher.clone(), ONE_SHOT_TTL, clock.clone())
        .with_fetch_timeout(http.request_timeout);
    let keys =
        KeySetProvider::new(fetcher, ONE_SHOT_TTL, clock).with_fetch_timeout(http.request_timeout);
    Ok((Arc::new(resolver), Arc::new(keys)))
}

/// `tokengate discover`
pub async fn discover(issuer: &Url, http: &HttpConfig) -> anyhow::Result<()> {
    let (resolver, _) = parts(http)?;
    let document = resolver.resolve(issuer).await?;
    print_json(document.as_ref())
}

/// `tokengate keys`
pub async fn keys(target: &KeysTarget, http: &HttpConfig) -> anyhow::Result<()> {
    let (resolver, provider) = parts(http)?;

    let set = match (&target.issuer, &target.jwks_uri) {
        (_, Some(jwks_uri)) => provider.get_keys_from(jwks_uri).await?,
        (Some(issuer), None) => {
            IssuerKeySource::new(issuer.clone(), resolver, provider)
                .current()
                .await?
        }
        (None, None) => bail!("either --issuer or --jwks-uri is required"),
    };

    print_json(&json!({
        "source": set.source(),
        "keys": set.summaries(),
    }))
}

fn load_gate(args: &ProviderArgs) -> anyhow::Result<Gate> {
    let config = GateConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let gate = Gate::from_config(&config)?;
    gate.guard(&args.provider)?;
    Ok(gate)
}

/// `tokengate verify`
///
/// Prints the claims on success, the error body on rejection.
pub async fn verify(
    args: &ProviderArgs,
    token: &str,
    require: &[AuthorizationPredicate],
) -> anyhow::Result<()> {
    let gate = load_gate(args)?;
    let guard = gate.guard(&args.provider)?;

    let outcome = match guard.authenticate(token).await {
        Ok(claims) => require
            .iter()
            .try_for_each(|p| guard.authorizer().require(&claims, p))
            .map(|()| claims),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(claims) => {
            info!(provider = %args.provider, predicates = require.len(), "Token accepted");
            print_json(&claims)
        }
        Err(e) => {
            print_json(&e.body())?;
            bail!("token rejected with HTTP {}: {e}", e.status().as_u16())
        }
    }
}

/// `tokengate token`
pub async fn token(args: &ProviderArgs, grant: GrantCommand) -> anyhow::Result<()> {
    let gate = load_gate(args)?;
    let client = gate
        .guard(&args.provider)?
        .token_client(gate.http_client())
        .await?;

    let response = match grant {
        GrantCommand::ClientCredentials { scopes } => client.client_credentials(&scopes).await?,
        GrantCommand::Password {
            username,
            password,
            scopes,
        } => {
            client
                .password(&username, &SecretString::new(password), &scopes)
                .await?
        }
        GrantCommand::Refresh { refresh_token } => {
            client.refresh(&SecretString::new(refresh_token)).await?
        }
    };
    print_json(&response)
}
