//! Storage API client.
//!
//! Only session handling lives here: the storage service issues an auth token
//! in exchange for `Storage-<domain>:<user>` credentials.

use reqwest::header::HeaderValue;
use tokio::sync::RwLock;

use super::ClientConfig;
use crate::error::ApiError;

const AUTH_PATH: &str = "/auth/v1.0";
const STORAGE_USER_HEADER: &str = "X-Storage-User";
const STORAGE_PASS_HEADER: &str = "X-Storage-Pass";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Client for the OPC storage API.
#[derive(Debug)]
pub struct StorageClient {
    config: ClientConfig,
    token: RwLock<Option<String>>,
}

impl StorageClient {
    /// Create a client. No request is sent until a token is needed.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            token: RwLock::new(None),
        }
    }

    /// The account as the storage service names it: `Storage-<domain>:<user>`.
    pub fn storage_user(&self) -> String {
        format!(
            "Storage-{}:{}",
            self.config.identity_domain, self.config.username
        )
    }

    /// Return the cached auth token, authenticating first if needed.
    pub async fn auth_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut token = self.token.write().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }
        let fresh = self.authenticate().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    async fn authenticate(&self) -> Result<String, ApiError> {
        let url = self.config.url(AUTH_PATH)?;
        let user = self.storage_user();
        self.config.log(&["Authenticating", &user]);

        let response = self
            .config
            .http_client
            .get(url)
            .header(STORAGE_USER_HEADER, user.as_str())
            .header(STORAGE_PASS_HEADER, self.config.password.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Authentication(format!(
                "{} returned {}",
                AUTH_PATH, status
            )));
        }

        response
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value: &HeaderValue| value.to_str().ok())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Authentication(format!("no {} in response", AUTH_TOKEN_HEADER)))
    }
}
