//! Compute API client: session handling, retries and name qualification.

use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::Method;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{ClientConfig, SecurityRulesClient, RETRY_BACKOFF};
use crate::error::ApiError;

/// Media type spoken by the compute API.
pub(crate) const COMPUTE_MEDIA_TYPE: &str = "application/oracle-compute-v3+json";

const AUTHENTICATE_PATH: &str = "/authenticate/";

/// Longest response body echoed into an error message.
const MAX_ERROR_BODY_LENGTH: usize = 512;

/// Client for the OPC compute API.
///
/// Cheap to clone; clones share the session cookie.
#[derive(Debug, Clone)]
pub struct ComputeClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    session: RwLock<Option<String>>,
}

impl ComputeClient {
    /// Create a client. No request is sent until the first API call.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                session: RwLock::new(None),
            }),
        }
    }

    /// The settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Security rule operations.
    pub fn security_rules(&self) -> SecurityRulesClient {
        SecurityRulesClient::new(self.clone())
    }

    /// The account user as the compute API names it: `/Compute-<domain>/<user>`.
    pub fn user_path(&self) -> String {
        let config = self.config();
        format!("/Compute-{}/{}", config.identity_domain, config.username)
    }

    /// Expand a short object name to `/Compute-<domain>/<user>/<name>`.
    ///
    /// Empty names and names that are already qualified pass through.
    pub fn qualified_name(&self, name: &str) -> String {
        if name.is_empty() || name.starts_with("/oracle") || name.starts_with("/Compute-") {
            return name.to_string();
        }
        format!("{}/{}", self.user_path(), name)
    }

    /// Strip the `/Compute-<domain>/<user>/` prefix from an object name.
    pub fn unqualified_name(&self, name: &str) -> String {
        if name.is_empty() || name.starts_with("/oracle") || !name.contains('/') {
            return name.to_string();
        }
        let parts: Vec<&str> = name.split('/').collect();
        if parts.len() < 4 {
            return name.to_string();
        }
        parts[3..].join("/")
    }

    /// Return the cached session cookie, authenticating first if needed.
    async fn session(&self) -> Result<String, ApiError> {
        if let Some(cookie) = self.inner.session.read().await.as_ref() {
            return Ok(cookie.clone());
        }

        let mut session = self.inner.session.write().await;
        if let Some(cookie) = session.as_ref() {
            return Ok(cookie.clone());
        }
        let cookie = self.authenticate().await?;
        *session = Some(cookie.clone());
        Ok(cookie)
    }

    /// Obtain a new session cookie, retrying like any other request.
    async fn authenticate(&self) -> Result<String, ApiError> {
        let attempts = self.config().attempts();
        let mut attempt = 1;
        loop {
            match self.try_authenticate().await {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(attempt, attempts, error = %err, "retrying authentication");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                },
                result => return result,
            }
        }
    }

    async fn try_authenticate(&self) -> Result<String, ApiError> {
        let config = self.config();
        let url = config.url(AUTHENTICATE_PATH)?;
        let body = serde_json::json!({
            "user": self.user_path(),
            "password": config.password,
        });

        config.log(&["Authenticating", &self.user_path()]);
        let response = config
            .http_client
            .post(url)
            .header(ACCEPT, COMPUTE_MEDIA_TYPE)
            .header(CONTENT_TYPE, COMPUTE_MEDIA_TYPE)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            let text = response.text().await?;
            return Err(status_error(status, &text));
        }
        if !status.is_success() {
            return Err(ApiError::Authentication(format!(
                "{} returned {}",
                AUTHENTICATE_PATH, status
            )));
        }

        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(str::trim)
            .find(|cookie| !cookie.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Authentication("no session cookie in response".to_string()))
    }

    async fn invalidate_session(&self) {
        *self.inner.session.write().await = None;
    }

    /// Send a request to an absolute API path and return the response body.
    ///
    /// Transport failures and 5xx responses are retried up to the configured
    /// number of attempts. A 401 drops the session and re-authenticates once.
    pub(crate) async fn send<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<String, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let config = self.config();
        let url = config.url(path)?;
        let payload = body.map(serde_json::to_vec).transpose()?;
        let attempts = config.attempts();

        let mut attempt = 1;
        let mut reauthenticated = false;
        loop {
            let cookie = self.session().await?;
            config.log(&[method.as_str(), url.as_str()]);

            let mut request = config
                .http_client
                .request(method.clone(), url.clone())
                .header(ACCEPT, COMPUTE_MEDIA_TYPE)
                .header(COOKIE, cookie);
            if let Some(payload) = &payload {
                request = request
                    .header(CONTENT_TYPE, COMPUTE_MEDIA_TYPE)
                    .body(payload.clone());
            }

            let result = match request.send().await {
                Ok(response) => read_response(response).await,
                Err(err) => Err(ApiError::Transport(err)),
            };

            match result {
                Ok(text) => {
                    config.log(&["Response:", method.as_str(), url.as_str(), "OK"]);
                    return Ok(text);
                },
                Err(ApiError::Status { status: 401, .. }) if !reauthenticated => {
                    debug!(url = %url, "session rejected, re-authenticating");
                    reauthenticated = true;
                    self.invalidate_session().await;
                },
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(url = %url, attempt, attempts, error = %err, "retrying compute API request");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                },
                Err(err) => {
                    config.log(&["Response:", method.as_str(), url.as_str(), &err.to_string()]);
                    return Err(err);
                },
            }
        }
    }
}

async fn read_response(response: reqwest::Response) -> Result<String, ApiError> {
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        return Ok(text);
    }
    Err(status_error(status, &text))
}

fn status_error(status: reqwest::StatusCode, text: &str) -> ApiError {
    let message = if text.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        text.chars().take(MAX_ERROR_BODY_LENGTH).collect()
    };
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}
