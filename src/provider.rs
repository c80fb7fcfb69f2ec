//! The OPC provider: configuration, then per-resource dispatch.
//!
//! [`OpcProvider::configure`] runs the client factory once; every resource
//! operation afterwards borrows the resulting client. Operations called before
//! a successful configure fail with a configuration error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{OpcClient, SecurityRulesApi};
use crate::config::Config;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resources::{
    security_rule_schema, SecurityRuleResource, SecurityRuleState, SECURITY_RULE_TYPE,
};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

type SecurityRules = SecurityRuleResource<Arc<dyn SecurityRulesApi>>;

/// What a successful configure produces.
struct Backend {
    client: Option<Arc<OpcClient>>,
    security_rules: SecurityRules,
}

/// Terraform-style provider for Oracle Cloud compute security rules.
pub struct OpcProvider {
    backend: RwLock<Option<Backend>>,
}

impl OpcProvider {
    /// An unconfigured provider.
    pub fn new() -> Self {
        Self {
            backend: RwLock::new(None),
        }
    }

    /// A provider already configured with `client`.
    pub fn with_client(client: OpcClient) -> Self {
        Self {
            backend: RwLock::new(Some(Backend::from_client(Arc::new(client)))),
        }
    }

    /// A provider whose security rule operations go to `api` instead of HTTP.
    pub fn with_security_rules(api: Arc<dyn SecurityRulesApi>) -> Self {
        Self {
            backend: RwLock::new(Some(Backend {
                client: None,
                security_rules: SecurityRuleResource::new(api),
            })),
        }
    }

    /// The configured API client, if configure has run.
    pub async fn client(&self) -> Option<Arc<OpcClient>> {
        self.backend
            .read()
            .await
            .as_ref()
            .and_then(|backend| backend.client.clone())
    }

    async fn security_rules(&self) -> Result<SecurityRules, ProviderError> {
        self.backend
            .read()
            .await
            .as_ref()
            .map(|backend| backend.security_rules.clone())
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "provider is not configured; call configure first".to_string(),
                )
            })
    }
}

impl Default for OpcProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OpcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let configured = self
            .backend
            .try_read()
            .map(|backend| backend.is_some())
            .ok();
        f.debug_struct("OpcProvider")
            .field("configured", &configured)
            .finish()
    }
}

impl Backend {
    fn from_client(client: Arc<OpcClient>) -> Self {
        let api: Arc<dyn SecurityRulesApi> = Arc::new(client.compute().security_rules());
        Self {
            client: Some(client),
            security_rules: SecurityRuleResource::new(api),
        }
    }
}

fn resource_schema(resource_type: &str) -> Result<Schema, ProviderError> {
    match resource_type {
        SECURITY_RULE_TYPE => Ok(security_rule_schema()),
        other => Err(ProviderError::UnknownResource(other.to_string())),
    }
}

#[async_trait]
impl ProviderService for OpcProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(Config::schema())
            .with_resource(SECURITY_RULE_TYPE, security_rule_schema())
    }

    #[instrument(skip(self, config), name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&Config::schema(), &config))
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Configure called");
        let configured = Config::from_value(config).and_then(|c| Ok((c.client()?, c.insecure)));
        let (client, insecure) = match configured {
            Ok(configured) => configured,
            Err(e) => {
                error!(error = %e, "Configure failed");
                return Ok(vec![e.into()]);
            },
        };

        let mut diagnostics = Vec::new();
        if insecure {
            diagnostics.push(
                Diagnostic::warning("TLS certificate verification is disabled")
                    .with_attribute("insecure"),
            );
        }

        *self.backend.write().await = Some(Backend::from_client(Arc::new(client)));
        info!("Configure completed successfully");
        Ok(diagnostics)
    }

    #[instrument(skip(self), name = "provider.stop")]
    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called");
        self.backend.write().await.take();
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = resource_schema(resource_type)?;
        Ok(validate(&schema, &config))
    }

    #[instrument(skip(self, state), name = "provider.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let schema = resource_schema(resource_type)?;
        if version < 0 || version as u64 > schema.version {
            return Err(ProviderError::Validation(format!(
                "Cannot upgrade {} state from schema version {}; current version is {}",
                resource_type, version, schema.version
            )));
        }
        Ok(state)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = resource_schema(resource_type)?;
        let plan = plan_resource(&schema, prior_state.as_ref(), proposed_state);
        debug!(
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Plan completed"
        );
        Ok(plan)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        resource_schema(resource_type)?;
        let mut state = SecurityRuleState::from_value(planned_state)?;
        self.security_rules().await?.create(&mut state).await.map_err(|e| {
            error!(error = %e, "Create failed");
            e
        })?;
        state.to_value()
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        resource_schema(resource_type)?;
        let mut state = SecurityRuleState::from_value(current_state)?;
        self.security_rules().await?.read(&mut state).await?;
        if state.id().is_none() {
            warn!("Resource is gone; returning state without id");
        }
        state.to_value()
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        resource_schema(resource_type)?;
        let prior = SecurityRuleState::from_value(prior_state)?;
        let mut state = SecurityRuleState::from_value(planned_state)?;
        if state.id().is_none() {
            state.id = prior.id;
        }
        self.security_rules().await?.update(&mut state).await.map_err(|e| {
            error!(error = %e, "Update failed");
            e
        })?;
        state.to_value()
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        resource_schema(resource_type)?;
        let state = SecurityRuleState::from_value(current_state)?;
        self.security_rules().await?.delete(&state).await.map_err(|e| {
            error!(error = %e, "Delete failed");
            e
        })
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        resource_schema(resource_type)?;
        let state = self.security_rules().await?.import(id).await?;
        Ok(vec![ImportedResource::new(resource_type, state.to_value()?)])
    }
}
