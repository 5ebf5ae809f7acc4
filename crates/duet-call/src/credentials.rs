//! Relay credential loading.
//!
//! A call manager either gets a fixed relay configuration or a base STUN list
//! plus a source of TURN credentials. Credentials are resolved once, while the
//! manager is being built; after that the configuration never changes.

use async_trait::async_trait;
use duet_common::ice::{DEFAULT_TURN_URLS, RelayConfig, TurnCredentials};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CallError;

/// Fetches credentials for the relay (TURN) servers.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<TurnCredentials>;
}

/// Where a call manager's relay configuration comes from.
#[derive(Clone)]
pub enum RelaySource {
    Static(RelayConfig),
    Dynamic {
        base: RelayConfig,
        turn_urls: Vec<String>,
        source: Arc<dyn CredentialSource>,
    },
}

impl RelaySource {
    /// Default STUN servers plus the default relay URLs, authenticated by `source`.
    pub fn dynamic(source: Arc<dyn CredentialSource>) -> Self {
        Self::Dynamic {
            base: RelayConfig::default(),
            turn_urls: DEFAULT_TURN_URLS.iter().map(|u| u.to_string()).collect(),
            source,
        }
    }

    /// Produce the final configuration. Never fails: a credential fetch that
    /// errors or outlives `timeout` leaves the base configuration in place.
    pub async fn resolve(self, timeout: Duration) -> RelayConfig {
        match self {
            RelaySource::Static(config) => config,
            RelaySource::Dynamic {
                base,
                turn_urls,
                source,
            } => {
                let outcome = match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(Ok(credentials)) => Ok(credentials),
                    Ok(Err(e)) => Err(CallError::CredentialFetchFailed(e.to_string())),
                    Err(_) => Err(CallError::CredentialFetchFailed(format!(
                        "no response within {timeout:?}"
                    ))),
                };
                match outcome {
                    Ok(credentials) => {
                        tracing::info!(
                            relays = turn_urls.len(),
                            "TURN credentials loaded"
                        );
                        base.with_turn(turn_urls, &credentials)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Continuing with STUN only");
                        base
                    }
                }
            }
        }
    }
}

impl Default for RelaySource {
    fn default() -> Self {
        RelaySource::Static(RelayConfig::default())
    }
}
