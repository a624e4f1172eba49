//! OAuth credential lifecycle for the pull-style provider API.
//!
//! The cached credential lives in a [`TokenStore`]. It starts out empty, is
//! populated by the first refresh (from the bootstrap refresh token) and is
//! replaced wholesale by every later refresh. Concurrent refreshes are not
//! coordinated; the last successful one wins.

use crate::config;
use crate::error::TokenError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::RwLock;
use tracing::{info, warn};

const USER_AGENT: &str = "Boostboard";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: f64,
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
}

/// Raw token endpoint response: either a credential or an error pair.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct TokenResponse {
    access_token: String,
    expires_in: f64,
    refresh_token: String,
    scope: String,
    token_type: String,
    error: String,
    error_description: String,
}

impl TokenResponse {
    fn into_credential(self) -> Result<Credential, TokenError> {
        if !self.error.is_empty() {
            let reason = if self.error_description.is_empty() {
                self.error
            } else {
                self.error_description
            };
            return Err(TokenError::Refresh(reason));
        }

        if self.access_token.is_empty() {
            return Err(TokenError::Refresh("response carried no access token".to_string()));
        }

        Ok(Credential {
            access_token: self.access_token,
            expires_in: self.expires_in,
            refresh_token: self.refresh_token,
            scope: self.scope,
            token_type: self.token_type,
        })
    }
}

/// Passive persistence for the single cached credential.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credential>, TokenError>;

    async fn save(&self, credential: &Credential) -> Result<(), TokenError>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Credential>, TokenError> {
        self.slot
            .read()
            .map(|slot| slot.clone())
            .map_err(|_| TokenError::Store("token slot poisoned".to_string()))
    }

    async fn save(&self, credential: &Credential) -> Result<(), TokenError> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| TokenError::Store("token slot poisoned".to_string()))?;
        *slot = Some(credential.clone());
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
struct KvResult {
    result: Option<String>,
}

/// REST key-value backend (`/get/<key>`, `/set/<key>`).
#[derive(Clone, Debug)]
pub struct KvTokenStore {
    client: reqwest::Client,
    url: String,
    token: String,
    key: String,
}

impl KvTokenStore {
    pub fn new(cfg: &config::Kv) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            key: "authToken".to_string(),
        }
    }
}

#[async_trait]
impl TokenStore for KvTokenStore {
    async fn load(&self) -> Result<Option<Credential>, TokenError> {
        let resp = self
            .client
            .get(format!("{}/get/{}", self.url, self.key))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(TokenError::Store(format!("kv returned {}: {}", status, body)));
        }

        let result: KvResult = serde_json::from_str(&body)?;

        match result.result {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    async fn save(&self, credential: &Credential) -> Result<(), TokenError> {
        let resp = self
            .client
            .post(format!("{}/set/{}", self.url, self.key))
            .bearer_auth(&self.token)
            .body(serde_json::to_string(credential)?)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TokenError::Store(format!("kv returned {}: {}", status, body)));
        }

        Ok(())
    }
}

/// Form-encoded calls to the provider's token endpoint.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(cfg: &config::Alby) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: cfg.token_url.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
        }
    }

    pub async fn refresh_grant(&self, refresh_token: &str) -> Result<Credential, TokenError> {
        self.request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    pub async fn authorization_code_grant(&self, code: &str) -> Result<Credential, TokenError> {
        self.request(&[
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn request(&self, form: &[(&str, &str)]) -> Result<Credential, TokenError> {
        let body = self
            .client
            .post(&self.token_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(form)
            .send()
            .await?
            .text()
            .await?;

        let response: TokenResponse = serde_json::from_str(&body)?;
        response.into_credential()
    }
}

pub struct TokenManager {
    store: Box<dyn TokenStore>,
    oauth: OAuthClient,
    bootstrap_refresh_token: String,
}

impl TokenManager {
    pub fn new(store: Box<dyn TokenStore>, oauth: OAuthClient, bootstrap_refresh_token: impl Into<String>) -> Self {
        Self {
            store,
            oauth,
            bootstrap_refresh_token: bootstrap_refresh_token.into(),
        }
    }

    /// Cached credential, or a fresh one from the bootstrap refresh token.
    pub async fn credential(&self) -> Result<Credential, TokenError> {
        match self.store.load().await? {
            Some(credential) => Ok(credential),
            None => {
                info!("no cached credential, refreshing from bootstrap token");
                self.refresh(None).await
            }
        }
    }

    /// Exchanges the refresh token of `current` (or the bootstrap token) for a
    /// new credential. The cache is only written on success.
    pub async fn refresh(&self, current: Option<&Credential>) -> Result<Credential, TokenError> {
        let refresh_token = match current {
            Some(credential) if !credential.refresh_token.is_empty() => credential.refresh_token.as_str(),
            _ => self.bootstrap_refresh_token.as_str(),
        };

        let credential = self.oauth.refresh_grant(refresh_token).await.map_err(|err| {
            warn!("token refresh failed: {}", err);
            err
        })?;

        self.store.save(&credential).await?;
        info!("refreshed access token");

        Ok(credential)
    }

    /// Refreshes whatever is cached right now.
    pub async fn refresh_current(&self) -> Result<Credential, TokenError> {
        let current = self.store.load().await?;
        self.refresh(current.as_ref()).await
    }

    pub async fn exchange_code(&self, code: &str) -> Result<Credential, TokenError> {
        let credential = self.oauth.authorization_code_grant(code).await?;
        self.store.save(&credential).await?;
        info!("stored credential from authorization code");
        Ok(credential)
    }

    /// Runs `call` with the cached access token. When the provider answers
    /// [`TokenError::InvalidToken`], refreshes once and retries once; a second
    /// rejection is returned to the caller.
    pub async fn with_token<T, F, Fut>(&self, call: F) -> Result<T, TokenError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, TokenError>>,
    {
        let credential = self.credential().await?;

        match call(credential.access_token.clone()).await {
            Err(TokenError::InvalidToken) => {
                warn!("access token rejected, refreshing");
                let fresh = self.refresh(Some(&credential)).await?;
                call(fresh.access_token).await
            }
            other => other,
        }
    }
}
