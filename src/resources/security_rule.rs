//! The `opc_compute_security_rule` resource.
//!
//! A security rule is identified by its name, which doubles as the resource
//! id. Create and Update re-read the rule afterwards so computed attributes
//! (`uri`) and list ordering come from the API. A Read that finds nothing
//! clears the id instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::client::{
    null_as_default, DeleteSecurityRuleInput, GetSecurityRuleInput, SecurityRuleInfo,
    SecurityRuleInput, SecurityRulesApi,
};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const SECURITY_RULE_TYPE: &str = "opc_compute_security_rule";

/// Declared and observed state of one security rule.
///
/// `None` means the attribute is absent from configuration (or not yet known).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecurityRuleState {
    /// Resource id; equal to `name` once the rule exists.
    #[serde(default)]
    pub id: Option<String>,
    /// Rule name; changing it replaces the rule.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// `ingress` or `egress`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub flow_direction: String,
    /// Defaults to `true` when unset.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// ACL the rule belongs to.
    #[serde(default)]
    pub acl: Option<String>,
    /// Source vNIC set.
    #[serde(default)]
    pub src_vnic_set: Option<String>,
    /// Destination vNIC set.
    #[serde(default)]
    pub dst_vnic_set: Option<String>,
    /// Security protocols the rule allows.
    #[serde(default)]
    pub security_protocols: Option<Vec<String>>,
    /// Source IP address prefix sets.
    #[serde(default)]
    pub src_ip_address_prefixes: Option<Vec<String>>,
    /// Destination IP address prefix sets.
    #[serde(default)]
    pub dst_ip_address_prefixes: Option<Vec<String>>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Description of the rule.
    #[serde(default)]
    pub description: Option<String>,
    /// Computed by the API.
    #[serde(default)]
    pub uri: Option<String>,
}

impl SecurityRuleState {
    /// Decode a host state object.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode as a host state object.
    pub fn to_value(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    /// State holding nothing but an id, as import starts from.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// The resource id, if the rule is known to exist.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Mark the rule as gone.
    pub fn clear_id(&mut self) {
        self.id = None;
    }

    /// Build the create/update request body from declared attributes.
    ///
    /// Optional scalars are sent only when set and non-empty; optional lists
    /// only when non-empty. `enabled` is always sent.
    pub fn to_input(&self) -> Result<SecurityRuleInput, ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Validation(
                "`name` is required for a security rule".to_string(),
            ));
        }
        if self.flow_direction.is_empty() {
            return Err(ProviderError::Validation(
                "`flow_direction` is required for a security rule".to_string(),
            ));
        }

        Ok(SecurityRuleInput {
            name: self.name.clone(),
            flow_direction: self.flow_direction.clone(),
            enabled: self.enabled.unwrap_or(true),
            acl: set_scalar(&self.acl),
            src_vnic_set: set_scalar(&self.src_vnic_set),
            dst_vnic_set: set_scalar(&self.dst_vnic_set),
            sec_protocols: set_list(&self.security_protocols),
            src_ip_address_prefix_sets: set_list(&self.src_ip_address_prefixes),
            dst_ip_address_prefix_sets: set_list(&self.dst_ip_address_prefixes),
            tags: set_list(&self.tags),
            description: set_scalar(&self.description),
        })
    }

    /// Overwrite every attribute with what the API reports, keeping remote
    /// list order.
    pub fn apply(&mut self, info: SecurityRuleInfo) {
        self.name = info.name;
        self.flow_direction = info.flow_direction;
        self.enabled = Some(info.enabled);
        self.acl = Some(info.acl);
        self.src_vnic_set = Some(info.src_vnic_set);
        self.dst_vnic_set = Some(info.dst_vnic_set);
        self.description = Some(info.description);
        self.uri = Some(info.uri);
        self.security_protocols = Some(info.sec_protocols);
        self.dst_ip_address_prefixes = Some(info.dst_ip_address_prefix_sets);
        self.src_ip_address_prefixes = Some(info.src_ip_address_prefix_sets);
        self.tags = Some(info.tags);
    }
}

fn set_scalar(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn set_list(value: &Option<Vec<String>>) -> Vec<String> {
    value.clone().unwrap_or_default()
}

/// Schema of the security rule resource.
pub fn security_rule_schema() -> Schema {
    Schema::v0()
        .with_description("A security rule permitting traffic between vNIC sets and IP prefix sets")
        .with_attribute("name", Attribute::required_string().with_force_new())
        .with_attribute(
            "flow_direction",
            Attribute::required_string().with_description("`ingress` or `egress`"),
        )
        .with_attribute("acl", Attribute::optional_string())
        .with_attribute("dst_ip_address_prefixes", Attribute::optional_string_list())
        .with_attribute("src_ip_address_prefixes", Attribute::optional_string_list())
        .with_attribute("security_protocols", Attribute::optional_string_list())
        .with_attribute("dst_vnic_set", Attribute::optional_string())
        .with_attribute("src_vnic_set", Attribute::optional_string())
        .with_attribute("enabled", Attribute::optional_bool().with_default(json!(true)))
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("tags", Attribute::optional_string_list())
        .with_attribute("uri", Attribute::computed_string())
}

/// Lifecycle handlers for security rules over a [`SecurityRulesApi`].
#[derive(Debug, Clone)]
pub struct SecurityRuleResource<A> {
    api: A,
}

impl<A: SecurityRulesApi> SecurityRuleResource<A> {
    /// Create handlers that call `api`.
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Create the rule, adopt its name as id, then read it back.
    #[instrument(skip(self, state), fields(name = %state.name))]
    pub async fn create(&self, state: &mut SecurityRuleState) -> Result<(), ProviderError> {
        let input = state.to_input()?;
        debug!(?input, "creating security rule");

        let created = self
            .api
            .create_security_rule(&input)
            .await
            .map_err(|e| ProviderError::api("Error creating Security Rule", e))?;

        info!(id = %created.name, "security rule created");
        state.id = Some(created.name);
        self.read(state).await
    }

    /// Refresh `state` from the API.
    ///
    /// A rule the API no longer has clears the id and returns `Ok`.
    #[instrument(skip(self, state), fields(id = ?state.id))]
    pub async fn read(&self, state: &mut SecurityRuleState) -> Result<(), ProviderError> {
        let id = state
            .id()
            .ok_or_else(|| ProviderError::Validation("security rule state has no id".to_string()))?
            .to_string();

        let input = GetSecurityRuleInput { name: id.clone() };
        match self.api.get_security_rule(&input).await {
            Ok(Some(remote)) => {
                state.apply(remote);
                Ok(())
            },
            Ok(None) => {
                warn!(id = %id, "security rule lookup returned nothing, removing from state");
                state.clear_id();
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                info!(id = %id, "security rule no longer exists, removing from state");
                state.clear_id();
                Ok(())
            },
            Err(e) => Err(ProviderError::api(
                format!("Error reading security rule {}", id),
                e,
            )),
        }
    }

    /// Push declared attributes to the API, then read the rule back.
    #[instrument(skip(self, state), fields(name = %state.name))]
    pub async fn update(&self, state: &mut SecurityRuleState) -> Result<(), ProviderError> {
        let input = state.to_input()?;
        debug!(?input, "updating security rule");

        let updated = self
            .api
            .update_security_rule(&input)
            .await
            .map_err(|e| ProviderError::api("Error updating Security Rule", e))?;

        state.id = Some(updated.name);
        self.read(state).await
    }

    /// Delete the rule. Every API failure, not-found included, is an error.
    #[instrument(skip(self, state), fields(id = ?state.id))]
    pub async fn delete(&self, state: &SecurityRuleState) -> Result<(), ProviderError> {
        let name = state
            .id()
            .ok_or_else(|| ProviderError::Validation("security rule state has no id".to_string()))?
            .to_string();

        self.api
            .delete_security_rule(&DeleteSecurityRuleInput { name: name.clone() })
            .await
            .map_err(|e| ProviderError::api("Error deleting Security Rule", e))?;

        info!(id = %name, "security rule deleted");
        Ok(())
    }

    /// Adopt an existing rule: the id is taken as-is, then read.
    #[instrument(skip(self))]
    pub async fn import(&self, id: &str) -> Result<SecurityRuleState, ProviderError> {
        let mut state = SecurityRuleState::with_id(id);
        self.read(&mut state).await?;
        if state.id().is_none() {
            return Err(ProviderError::NotFound(format!(
                "Cannot import non-existent security rule {}",
                id
            )));
        }
        Ok(state)
    }
}
