//! Clients for the Oracle Cloud compute and storage APIs.
//!
//! [`OpcClient`] is what the client factory ([`crate::config::Config::client`])
//! produces and what every resource operation borrows. It is read-only after
//! construction; the sub-clients cache their session credentials internally.

mod compute;
mod security_rules;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::ProviderError;
use crate::logging::ApiLogger;

pub use compute::ComputeClient;
pub use security_rules::{
    CreateSecurityRuleInput, DeleteSecurityRuleInput, GetSecurityRuleInput, SecurityRuleInfo,
    SecurityRuleInput, SecurityRulesApi, SecurityRulesClient, UpdateSecurityRuleInput,
};
pub use storage::StorageClient;

pub(crate) use security_rules::null_as_default;

/// Delay added per failed attempt before a request is retried.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Settings shared by the compute and storage clients.
#[derive(Clone)]
pub struct ClientConfig {
    /// Identity domain the account belongs to.
    pub identity_domain: String,
    /// Account user name.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Base URL of the API.
    pub api_endpoint: Url,
    /// Total attempts per request; values below 1 mean a single attempt.
    pub max_retries: u32,
    /// Transport used for every request.
    pub http_client: reqwest::Client,
    /// Debug sink for request/response traffic.
    pub logger: Option<Arc<dyn ApiLogger>>,
}

impl ClientConfig {
    pub(crate) fn log(&self, parts: &[&str]) {
        if let Some(logger) = &self.logger {
            logger.log(parts);
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Append an absolute API path to the endpoint, keeping any base path.
    pub(crate) fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.api_endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path))
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("identity_domain", &self.identity_domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_endpoint", &self.api_endpoint.as_str())
            .field("max_retries", &self.max_retries)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Handles to the OPC APIs for one provider instance.
#[derive(Debug)]
pub struct OpcClient {
    compute: ComputeClient,
    storage: Option<StorageClient>,
}

impl OpcClient {
    /// Assemble a client from its sub-clients.
    pub fn new(compute: ComputeClient, storage: Option<StorageClient>) -> Self {
        Self { compute, storage }
    }

    /// The compute API client.
    pub fn compute(&self) -> &ComputeClient {
        &self.compute
    }

    /// The storage API client, if storage was enabled in the configuration.
    pub fn storage(&self) -> Result<&StorageClient, ProviderError> {
        self.storage.as_ref().ok_or_else(|| {
            ProviderError::Configuration(
                "Storage client is not initialized. Set `storage = true` in the provider configuration"
                    .to_string(),
            )
        })
    }

    /// Whether a storage client was constructed.
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }
}

#[cfg(test)]
pub(crate) fn test_config(endpoint: &str) -> ClientConfig {
    ClientConfig {
        identity_domain: "mydomain".to_string(),
        username: "user@example.com".to_string(),
        password: "secret".to_string(),
        api_endpoint: Url::parse(endpoint).unwrap(),
        max_retries: 1,
        http_client: reqwest::Client::new(),
        logger: None,
    }
}
