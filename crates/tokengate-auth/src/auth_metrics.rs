//! Verification and key-fetch counters
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `tokengate_verifications_total` - Counter for token verifications (labels: provider, outcome)
//! - `tokengate_key_fetches_total` - Counter for key-set fetches (labels: outcome)

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Register metric descriptions. Idempotent; call once at startup.
#[cfg(feature = "metrics")]
pub fn init_gate_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "tokengate_verifications_total",
            "Token verifications by provider and outcome code"
        );
        describe_counter!(
            "tokengate_key_fetches_total",
            "Key-set fetches by outcome"
        );
    });
}

/// Record a verification; `outcome` is `"success"` or an error code
#[cfg(feature = "metrics")]
pub(crate) fn record_verification(provider: &str, outcome: &'static str) {
    counter!(
        "tokengate_verifications_total",
        "provider" => provider.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a key-set fetch
#[cfg(feature = "metrics")]
pub(crate) fn record_key_fetch(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("tokengate_key_fetches_total", "outcome" => outcome).increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_gate_metrics() {}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub(crate) fn record_verification(_provider: &str, _outcome: &'static str) {}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub(crate) fn record_key_fetch(_success: bool) {}
