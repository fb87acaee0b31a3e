//! Token acquisition: silent renewal first, interactive device-code flow
//! as the fallback.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::cache::{Credential, TokenStore};
use crate::config::ClientAuthConfig;
use crate::error::{Error, Result};

/// Response from the device-code endpoint.
#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    /// Seconds until the flow expires.
    expires_in: u64,
    /// Suggested polling interval in seconds.
    interval: Option<u64>,
    /// Human-readable instructions from the provider.
    message: Option<String>,
}

/// Response from the token endpoint, for both refresh and device grants.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, previous_account: Option<String>) -> Result<Credential> {
        let access_token = self.access_token.ok_or_else(|| {
            Error::Auth(
                self.error_description
                    .or(self.error)
                    .unwrap_or_else(|| "token endpoint returned no access token".to_string()),
            )
        })?;
        let expires_in = self.expires_in.unwrap_or(3600);

        Ok(Credential {
            access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in as i64),
            refresh_token: self.refresh_token,
            account: previous_account,
        })
    }
}

/// Acquires and caches access tokens.
///
/// Process-wide singleton: the internal mutex guarantees at most one
/// acquisition is in flight, so a second caller waits for the first and
/// then reuses the freshly persisted credential instead of starting a
/// duplicate device flow.
pub struct TokenAcquirer {
    config: ClientAuthConfig,
    http: reqwest::Client,
    store: TokenStore,
    gate: Mutex<()>,
}

impl TokenAcquirer {
    pub fn new(config: ClientAuthConfig, store: TokenStore) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            store,
            gate: Mutex::new(()),
        }
    }

    /// Acquire a credential: cached if fresh, silently renewed if refresh
    /// material exists, interactively via the device-code flow otherwise.
    /// Every successful path persists the credential before returning.
    pub async fn acquire(&self) -> Result<Credential> {
        let _guard = self.gate.lock().await;

        let mut cache = self.store.load().await;

        if let Some(credential) = cache.current() {
            if credential.is_fresh() {
                debug!("Using cached access token");
                return Ok(credential.clone());
            }

            // Silent renewal. A failure here is recoverable: fall through
            // to the interactive flow.
            if let Some(refresh_token) = credential.refresh_token.clone() {
                let account = credential.account.clone();
                match self.refresh(&refresh_token, account).await {
                    Ok(renewed) => {
                        info!("Token renewed silently from cache");
                        cache.update(renewed.clone());
                        self.store.save(&mut cache).await?;
                        return Ok(renewed);
                    }
                    Err(e) => {
                        warn!(error = %e, "Silent renewal failed, starting device flow");
                    }
                }
            }
        }

        let credential = self.device_flow().await?;
        cache.update(credential.clone());
        self.store.save(&mut cache).await?;
        Ok(credential)
    }

    /// Exchange a refresh token for a new credential.
    async fn refresh(&self, refresh_token: &str, account: Option<String>) -> Result<Credential> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let response: TokenResponse = self
            .http
            .post(self.config.token_endpoint())
            .form(&params)
            .send()
            .await?
            .json()
            .await?;

        response.into_credential(account)
    }

    /// Run the interactive device-code flow: obtain a user code, show the
    /// provider's instructions, and poll the token endpoint until the
    /// operator completes authorization or the flow expires.
    async fn device_flow(&self) -> Result<Credential> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .http
            .post(self.config.device_code_endpoint())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("device flow could not start: {text}")));
        }

        let authorization: DeviceAuthorization = response.json().await?;

        let message = authorization.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, visit {} and enter the code {}",
                authorization.verification_uri, authorization.user_code
            )
        });
        info!("{message}");
        eprintln!("{message}");

        self.poll_for_token(&authorization).await
    }

    /// Poll the token endpoint honoring the provider's interval and the
    /// flow's expiry window.
    async fn poll_for_token(&self, authorization: &DeviceAuthorization) -> Result<Credential> {
        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = Duration::from_secs(authorization.interval.unwrap_or(5).max(1));

        loop {
            tokio::time::sleep(interval).await;
            if Instant::now() >= deadline {
                return Err(Error::DeviceFlowExpired);
            }

            let params = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", authorization.device_code.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ];

            let response: TokenResponse = self
                .http
                .post(self.config.token_endpoint())
                .form(&params)
                .send()
                .await?
                .json()
                .await?;

            match response.error.as_deref() {
                Some("authorization_pending") => continue,
                Some("slow_down") => {
                    interval += Duration::from_secs(5);
                    continue;
                }
                Some("expired_token") => return Err(Error::DeviceFlowExpired),
                Some("access_denied") => {
                    return Err(Error::DeviceFlowRejected(
                        response
                            .error_description
                            .unwrap_or_else(|| "the operator denied the request".to_string()),
                    ));
                }
                Some(other) => {
                    return Err(Error::Auth(format!(
                        "device flow failed: {other}: {}",
                        response.error_description.unwrap_or_default()
                    )));
                }
                None => return response.into_credential(None),
            }
        }
    }
}
