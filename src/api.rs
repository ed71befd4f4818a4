//! HTTP client for the application API.
//!
//! Two endpoints matter to the realtime pipeline:
//!
//! - the broker authorization endpoint, which signs private-channel
//!   subscriptions for a given socket id;
//! - the unread-count endpoint, the source of truth for the badge count.
//!
//! Both authenticate with the bearer credential, read from the credential
//! store on every request so a login/logout takes effect immediately.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::constants;
use crate::credentials::{self, CredentialStore};
use crate::notifications::UnreadCountSource;
use crate::transport::ChannelAuthorizer;

/// Path of the unread-count endpoint below the API base URL.
const UNREAD_COUNT_PATH: &str = "notifications/unread-count";

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: String,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    success: bool,
    #[serde(default)]
    data: Option<UnreadCountData>,
}

#[derive(Debug, Deserialize)]
struct UnreadCountData {
    count: i64,
}

/// API client shared by the transport (channel auth) and the store
/// (unread count).
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api_url: String,
    auth_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    /// Creates a client from configuration.
    pub fn new(config: &Config, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.auth_url(),
            credentials,
        ))
    }

    /// Creates a client with a pre-configured HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        auth_url: String,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth_url,
            credentials,
        }
    }

    async fn bearer(&self) -> Result<String> {
        match credentials::read_token(&self.credentials).await {
            Some(token) => Ok(format!("Bearer {token}")),
            None => bail!("no credential available"),
        }
    }

    /// Fetch the server-side unread count.
    ///
    /// Any non-success response, including `success: false`, is an error.
    /// Negative counts are clamped to zero.
    pub async fn unread_count(&self) -> Result<u64> {
        let url = format!("{}/{}", self.api_url, UNREAD_COUNT_PATH);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer().await?)
            .header("Accept", "application/json")
            .send()
            .await
            .context("unread-count request failed")?;

        if !response.status().is_success() {
            bail!("unread-count request failed: {}", response.status());
        }

        let body: UnreadCountResponse = response
            .json()
            .await
            .context("invalid unread-count response")?;

        match body.data {
            Some(data) if body.success => Ok(u64::try_from(data.count).unwrap_or(0)),
            _ => bail!("unread-count endpoint reported failure"),
        }
    }

    /// Sign a private-channel subscription for `socket_id`.
    pub async fn authorize_channel(&self, socket_id: &str, channel: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.auth_url)
            .header("Authorization", self.bearer().await?)
            .header("Accept", "application/json")
            .json(&AuthRequest {
                socket_id,
                channel_name: channel,
            })
            .send()
            .await
            .with_context(|| format!("auth request for {channel} failed"))?;

        if !response.status().is_success() {
            bail!("auth for {} rejected: {}", channel, response.status());
        }

        let body: AuthResponse = response
            .json()
            .await
            .context("invalid auth response")?;
        Ok(body.auth)
    }
}

#[async_trait]
impl UnreadCountSource for ApiClient {
    async fn fetch_unread_count(&self) -> Result<u64> {
        self.unread_count().await
    }
}

#[async_trait]
impl ChannelAuthorizer for ApiClient {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String> {
        self.authorize_channel(socket_id, channel).await
    }
}
