//! Provider configuration and the client factory.
//!
//! [`Config`] is resolved from the provider configuration block, with
//! `OPC_*` environment variables filling attributes the block leaves unset.
//! [`Config::client`] turns it into an [`OpcClient`] without touching the
//! network.

use std::sync::Arc;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::client::{ClientConfig, ComputeClient, OpcClient, StorageClient};
use crate::error::ProviderError;
use crate::logging::{default_api_logger, ApiLogger};
use crate::schema::{Attribute, Schema};

/// Attempts per request when neither configuration nor environment sets one.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("opc-provider/", env!("CARGO_PKG_VERSION"));

/// Resolved provider configuration. Immutable once a client is built from it.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Account user name.
    pub user: String,
    /// Account password.
    pub password: String,
    /// Identity domain of the account.
    pub identity_domain: String,
    /// Compute API endpoint, an absolute URI.
    pub endpoint: String,
    /// Total attempts per API request.
    pub max_retries: u32,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Also build a storage API client.
    pub storage: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("identity_domain", &self.identity_domain)
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .field("insecure", &self.insecure)
            .field("storage", &self.storage)
            .finish()
    }
}

/// The provider block as written, before environment fallbacks.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    user: Option<String>,
    password: Option<String>,
    identity_domain: Option<String>,
    endpoint: Option<String>,
    #[serde(default, deserialize_with = "whole_number")]
    max_retries: Option<u32>,
    insecure: Option<bool>,
    storage: Option<bool>,
}

/// Accept `3` and `3.0` alike; anything fractional, negative or too large is an error.
fn whole_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let whole = match number.as_u64() {
        Some(n) => Some(n),
        None => number
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0)
            .map(|f| f as u64),
    };
    whole
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("expected a whole number, got {}", number)))
}

impl Config {
    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Oracle Cloud compute account settings")
            .with_attribute(
                "user",
                Attribute::optional_string().with_description("User name. Falls back to OPC_USERNAME"),
            )
            .with_attribute(
                "password",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Password. Falls back to OPC_PASSWORD"),
            )
            .with_attribute(
                "identity_domain",
                Attribute::optional_string()
                    .with_description("Identity domain. Falls back to OPC_IDENTITY_DOMAIN"),
            )
            .with_attribute(
                "endpoint",
                Attribute::optional_string()
                    .with_description("Compute API endpoint. Falls back to OPC_ENDPOINT"),
            )
            .with_attribute(
                "max_retries",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_MAX_RETRIES))
                    .with_description("Attempts per API request. Falls back to OPC_MAX_RETRIES"),
            )
            .with_attribute(
                "insecure",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Skip TLS certificate verification. Falls back to OPC_INSECURE"),
            )
            .with_attribute(
                "storage",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Also configure the storage API client"),
            )
    }

    /// Resolve configuration from a provider block and the process environment.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(value, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a provider block, looking up unset
    /// attributes through `env`.
    pub fn from_value_with_env<F>(value: Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = if value.is_null() {
            RawConfig::default()
        } else {
            serde_json::from_value(value)
                .map_err(|e| ProviderError::Configuration(format!("Invalid provider configuration: {}", e)))?
        };

        let required = |given: Option<String>, attribute: &str, var: &str| {
            given
                .or_else(|| env(var))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    ProviderError::Configuration(format!(
                        "`{}` must be set in the provider configuration or via {}",
                        attribute, var
                    ))
                })
        };

        let max_retries = match raw.max_retries {
            Some(n) => n,
            None => match env("OPC_MAX_RETRIES") {
                Some(v) => v.trim().parse().map_err(|_| {
                    ProviderError::Configuration(format!("OPC_MAX_RETRIES is not a number: {}", v))
                })?,
                None => DEFAULT_MAX_RETRIES,
            },
        };

        let insecure = match raw.insecure {
            Some(flag) => flag,
            None => env("OPC_INSECURE").map(|v| parse_flag(&v)).unwrap_or(false),
        };

        Ok(Self {
            user: required(raw.user, "user", "OPC_USERNAME")?,
            password: required(raw.password, "password", "OPC_PASSWORD")?,
            identity_domain: required(raw.identity_domain, "identity_domain", "OPC_IDENTITY_DOMAIN")?,
            endpoint: required(raw.endpoint, "endpoint", "OPC_ENDPOINT")?,
            max_retries,
            insecure,
            storage: raw.storage.unwrap_or(false),
        })
    }

    /// Build the API client.
    ///
    /// The API logger is wired only when debug output is enabled for the
    /// `opc_api` log target.
    pub fn client(&self) -> Result<OpcClient, ProviderError> {
        self.client_with_logger(default_api_logger())
    }

    /// Build the API client with an explicit debug logger.
    pub fn client_with_logger(
        &self,
        logger: Option<Arc<dyn ApiLogger>>,
    ) -> Result<OpcClient, ProviderError> {
        let api_endpoint = parse_endpoint(&self.endpoint)?;
        let http_client = self.http_client()?;

        let client_config = ClientConfig {
            identity_domain: self.identity_domain.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            api_endpoint,
            max_retries: self.max_retries,
            http_client,
            logger,
        };

        let storage = self
            .storage
            .then(|| StorageClient::new(client_config.clone()));
        let compute = ComputeClient::new(client_config);

        debug!(
            endpoint = %self.endpoint,
            identity_domain = %self.identity_domain,
            storage = storage.is_some(),
            "OPC client configured"
        );
        Ok(OpcClient::new(compute, storage))
    }

    fn http_client(&self) -> Result<reqwest::Client, ProviderError> {
        if self.insecure {
            warn!("TLS certificate verification is disabled for the OPC endpoint");
        }
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(self.insecure)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to create HTTP client: {}", e)))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Parse the endpoint, requiring an absolute http(s) URI with a host.
fn parse_endpoint(endpoint: &str) -> Result<Url, ProviderError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ProviderError::Configuration(format!("Invalid endpoint URI: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(ProviderError::Configuration(format!(
            "Invalid endpoint URI: {} is not an absolute http(s) URI",
            endpoint
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn full() -> Value {
        json!({
            "user": "user@example.com",
            "password": "secret",
            "identity_domain": "mydomain",
            "endpoint": "https://api-z27.compute.us6.oraclecloud.com/",
        })
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_value_with_env(full(), no_env).unwrap();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!config.insecure);
        assert!(!config.storage);
    }

    #[test]
    fn test_environment_fallback() {
        let env: HashMap<&str, &str> = [
            ("OPC_USERNAME", "env-user"),
            ("OPC_PASSWORD", "env-pass"),
            ("OPC_IDENTITY_DOMAIN", "env-domain"),
            ("OPC_ENDPOINT", "https://env.example.com"),
            ("OPC_MAX_RETRIES", "5"),
            ("OPC_INSECURE", "true"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_value_with_env(json!({"user": "explicit"}), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.user, "explicit");
        assert_eq!(config.password, "env-pass");
        assert_eq!(config.identity_domain, "env-domain");
        assert_eq!(config.endpoint, "https://env.example.com");
        assert_eq!(config.max_retries, 5);
        assert!(config.insecure);
    }

    #[test]
    fn test_missing_required_attribute() {
        let mut value = full();
        value.as_object_mut().unwrap().remove("password");
        let err = Config::from_value_with_env(value, no_env).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains("OPC_PASSWORD"));
    }

    #[test]
    fn test_bad_max_retries_env() {
        let mut value = full();
        value.as_object_mut().unwrap().remove("max_retries");
        let err = Config::from_value_with_env(value, |k| {
            (k == "OPC_MAX_RETRIES").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("OPC_MAX_RETRIES"));
    }

    #[test]
    fn test_max_retries_whole_float() {
        let mut value = full();
        value["max_retries"] = json!(3.0);
        assert!(validate(&Config::schema(), &value).is_empty());
        let config = Config::from_value_with_env(value, no_env).unwrap();
        assert_eq!(config.max_retries, 3);

        for bad in [json!(2.5), json!(-1)] {
            let mut value = full();
            value["max_retries"] = bad;
            assert!(Config::from_value_with_env(value, no_env).is_err());
        }
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let mut value = full();
        value["region"] = json!("us6");
        assert!(Config::from_value_with_env(value, no_env).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::from_value_with_env(full(), no_env).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_invalid_endpoint_is_configuration_error() {
        for endpoint in ["not a uri", "/relative/path", "mailto:ops@example.com"] {
            let mut value = full();
            value["endpoint"] = json!(endpoint);
            let config = Config::from_value_with_env(value, no_env).unwrap();
            let err = config.client().unwrap_err();
            assert!(
                err.to_string().contains("Invalid endpoint URI"),
                "{} produced {}",
                endpoint,
                err
            );
        }
    }

    #[test]
    fn test_client_without_storage() {
        let config = Config::from_value_with_env(full(), no_env).unwrap();
        let client = config.client().unwrap();
        assert!(!client.has_storage());
        assert_eq!(client.compute().config().max_retries, 1);
    }

    #[test]
    fn test_client_with_storage_and_insecure() {
        let mut value = full();
        value["storage"] = json!(true);
        value["insecure"] = json!(true);
        value["max_retries"] = json!(3);
        let config = Config::from_value_with_env(value, no_env).unwrap();
        let client = config.client_with_logger(None).unwrap();
        assert!(client.has_storage());
        assert!(client.storage().is_ok());
        assert_eq!(client.compute().config().max_retries, 3);
        assert!(client.compute().config().logger.is_none());
    }

    #[test]
    fn test_schema_accepts_full_config() {
        let schema = Config::schema();
        assert!(validate(&schema, &full()).is_empty());
        assert!(schema.attribute("password").unwrap().flags.sensitive);
    }
}
