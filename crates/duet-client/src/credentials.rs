//! Relay credentials fetched from the credential endpoint.

use async_trait::async_trait;
use duet_call::credentials::CredentialSource;
use duet_common::ice::TurnCredentials;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::{ClientError, Result};

const TURN_CONFIG_PATH: &str = "/api/turn-config";

#[derive(Clone)]
pub struct HttpCredentialSource {
    client: Client,
    url: String,
}

impl HttpCredentialSource {
    /// Fetch from the relay at `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ClientError::Http)?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), TURN_CONFIG_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get(&self) -> Result<TurnCredentials> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<TurnCredentials>().await?)
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> anyhow::Result<TurnCredentials> {
        Ok(self.get().await?)
    }
}
