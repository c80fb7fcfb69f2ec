//! Security rule requests against the compute API.
//!
//! Security rules are SDN rules that permit traffic between vNIC sets and IP
//! address prefix sets. They live under `/network/v1/secrule`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};

use super::ComputeClient;
use crate::error::ApiError;

const SECURITY_RULE_ROOT: &str = "/network/v1/secrule";

/// Body of a create or update request.
///
/// Optional scalars are omitted from the wire when `None`; lists are omitted
/// when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleInput {
    /// Name of the rule.
    pub name: String,
    /// `ingress` or `egress`.
    pub flow_direction: String,
    /// Whether the rule is enabled.
    #[serde(rename = "enabledFlag")]
    pub enabled: bool,
    /// ACL the rule belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
    /// Source vNIC set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_vnic_set: Option<String>,
    /// Destination vNIC set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_vnic_set: Option<String>,
    /// Security protocols the rule allows.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sec_protocols: Vec<String>,
    /// Source IP address prefix sets.
    #[serde(rename = "srcIpAddressPrefixSets", skip_serializing_if = "Vec::is_empty")]
    pub src_ip_address_prefix_sets: Vec<String>,
    /// Destination IP address prefix sets.
    #[serde(rename = "dstIpAddressPrefixSets", skip_serializing_if = "Vec::is_empty")]
    pub dst_ip_address_prefix_sets: Vec<String>,
    /// Free-form tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Description of the rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request body for creating a security rule.
pub type CreateSecurityRuleInput = SecurityRuleInput;

/// Request body for updating a security rule.
pub type UpdateSecurityRuleInput = SecurityRuleInput;

/// Identifies the rule to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSecurityRuleInput {
    /// Name of the rule.
    pub name: String,
}

/// Identifies the rule to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteSecurityRuleInput {
    /// Name of the rule.
    pub name: String,
}

/// A security rule as the API reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleInfo {
    /// Name of the rule.
    pub name: String,
    /// `ingress` or `egress`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub flow_direction: String,
    /// Whether the rule is enabled.
    #[serde(rename = "enabledFlag", default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    /// ACL the rule belongs to.
    #[serde(default, deserialize_with = "null_as_default")]
    pub acl: String,
    /// Source vNIC set.
    #[serde(default, deserialize_with = "null_as_default")]
    pub src_vnic_set: String,
    /// Destination vNIC set.
    #[serde(default, deserialize_with = "null_as_default")]
    pub dst_vnic_set: String,
    /// Security protocols the rule allows.
    #[serde(default, deserialize_with = "null_as_default")]
    pub sec_protocols: Vec<String>,
    /// Source IP address prefix sets.
    #[serde(
        rename = "srcIpAddressPrefixSets",
        default,
        deserialize_with = "null_as_default"
    )]
    pub src_ip_address_prefix_sets: Vec<String>,
    /// Destination IP address prefix sets.
    #[serde(
        rename = "dstIpAddressPrefixSets",
        default,
        deserialize_with = "null_as_default"
    )]
    pub dst_ip_address_prefix_sets: Vec<String>,
    /// Free-form tags.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Description of the rule.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Canonical URI of the rule.
    #[serde(default, deserialize_with = "null_as_default")]
    pub uri: String,
}

/// Deserialize `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Security rule operations.
///
/// The resource reconciler talks to this trait, so it can run against the
/// HTTP client or an in-memory double.
#[async_trait]
pub trait SecurityRulesApi: Send + Sync {
    /// Create a rule and return what the API stored.
    async fn create_security_rule(
        &self,
        input: &CreateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError>;

    /// Fetch a rule. `Ok(None)` means the API returned an empty body.
    async fn get_security_rule(
        &self,
        input: &GetSecurityRuleInput,
    ) -> Result<Option<SecurityRuleInfo>, ApiError>;

    /// Replace a rule's attributes and return what the API stored.
    async fn update_security_rule(
        &self,
        input: &UpdateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError>;

    /// Delete a rule.
    async fn delete_security_rule(&self, input: &DeleteSecurityRuleInput) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: SecurityRulesApi + ?Sized> SecurityRulesApi for Arc<T> {
    async fn create_security_rule(
        &self,
        input: &CreateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError> {
        (**self).create_security_rule(input).await
    }

    async fn get_security_rule(
        &self,
        input: &GetSecurityRuleInput,
    ) -> Result<Option<SecurityRuleInfo>, ApiError> {
        (**self).get_security_rule(input).await
    }

    async fn update_security_rule(
        &self,
        input: &UpdateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError> {
        (**self).update_security_rule(input).await
    }

    async fn delete_security_rule(&self, input: &DeleteSecurityRuleInput) -> Result<(), ApiError> {
        (**self).delete_security_rule(input).await
    }
}

/// HTTP implementation of [`SecurityRulesApi`].
#[derive(Debug, Clone)]
pub struct SecurityRulesClient {
    compute: ComputeClient,
}

impl SecurityRulesClient {
    pub(crate) fn new(compute: ComputeClient) -> Self {
        Self { compute }
    }

    fn object_path(&self, name: &str) -> String {
        format!("{}{}", SECURITY_RULE_ROOT, self.compute.qualified_name(name))
    }

    fn qualify_all(&self, names: &[String]) -> Vec<String> {
        names.iter().map(|n| self.compute.qualified_name(n)).collect()
    }

    fn unqualify_all(&self, names: &[String]) -> Vec<String> {
        names.iter().map(|n| self.compute.unqualified_name(n)).collect()
    }

    /// Qualify every name-valued field for the wire.
    fn qualified(&self, input: &SecurityRuleInput) -> SecurityRuleInput {
        let qualify = |name: &Option<String>| name.as_deref().map(|n| self.compute.qualified_name(n));
        SecurityRuleInput {
            name: self.compute.qualified_name(&input.name),
            acl: qualify(&input.acl),
            src_vnic_set: qualify(&input.src_vnic_set),
            dst_vnic_set: qualify(&input.dst_vnic_set),
            sec_protocols: self.qualify_all(&input.sec_protocols),
            src_ip_address_prefix_sets: self.qualify_all(&input.src_ip_address_prefix_sets),
            dst_ip_address_prefix_sets: self.qualify_all(&input.dst_ip_address_prefix_sets),
            ..input.clone()
        }
    }

    /// Strip qualification from every name-valued field of a response.
    fn unqualified(&self, mut info: SecurityRuleInfo) -> SecurityRuleInfo {
        info.name = self.compute.unqualified_name(&info.name);
        info.acl = self.compute.unqualified_name(&info.acl);
        info.src_vnic_set = self.compute.unqualified_name(&info.src_vnic_set);
        info.dst_vnic_set = self.compute.unqualified_name(&info.dst_vnic_set);
        info.sec_protocols = self.unqualify_all(&info.sec_protocols);
        info.src_ip_address_prefix_sets = self.unqualify_all(&info.src_ip_address_prefix_sets);
        info.dst_ip_address_prefix_sets = self.unqualify_all(&info.dst_ip_address_prefix_sets);
        info
    }

    fn decode(&self, body: &str) -> Result<SecurityRuleInfo, ApiError> {
        let info: SecurityRuleInfo = serde_json::from_str(body)?;
        Ok(self.unqualified(info))
    }
}

#[async_trait]
impl SecurityRulesApi for SecurityRulesClient {
    async fn create_security_rule(
        &self,
        input: &CreateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError> {
        let path = format!("{}/", SECURITY_RULE_ROOT);
        let body = self
            .compute
            .send(Method::POST, &path, Some(&self.qualified(input)))
            .await?;
        self.decode(&body)
    }

    async fn get_security_rule(
        &self,
        input: &GetSecurityRuleInput,
    ) -> Result<Option<SecurityRuleInfo>, ApiError> {
        let body = self
            .compute
            .send::<()>(Method::GET, &self.object_path(&input.name), None)
            .await?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        self.decode(trimmed).map(Some)
    }

    async fn update_security_rule(
        &self,
        input: &UpdateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError> {
        let body = self
            .compute
            .send(
                Method::PUT,
                &self.object_path(&input.name),
                Some(&self.qualified(input)),
            )
            .await?;
        self.decode(&body)
    }

    async fn delete_security_rule(&self, input: &DeleteSecurityRuleInput) -> Result<(), ApiError> {
        self.compute
            .send::<()>(Method::DELETE, &self.object_path(&input.name), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_config;
    use serde_json::json;

    fn client() -> SecurityRulesClient {
        ComputeClient::new(test_config("https://api.example.com")).security_rules()
    }

    #[test]
    fn test_input_omits_unset_fields() {
        let input = SecurityRuleInput {
            name: "rule1".to_string(),
            flow_direction: "ingress".to_string(),
            enabled: true,
            ..Default::default()
        };
        let encoded = serde_json::to_value(&input).unwrap();
        assert_eq!(
            encoded,
            json!({"name": "rule1", "flowDirection": "ingress", "enabledFlag": true})
        );
    }

    #[test]
    fn test_qualified_input() {
        let input = SecurityRuleInput {
            name: "rule1".to_string(),
            flow_direction: "egress".to_string(),
            enabled: false,
            acl: Some("acl1".to_string()),
            src_ip_address_prefix_sets: vec!["corp".to_string()],
            description: Some("web tier".to_string()),
            ..Default::default()
        };
        let wire = client().qualified(&input);
        assert_eq!(wire.name, "/Compute-mydomain/user@example.com/rule1");
        assert_eq!(
            wire.acl.as_deref(),
            Some("/Compute-mydomain/user@example.com/acl1")
        );
        assert!(wire.src_vnic_set.is_none());
        assert_eq!(
            wire.src_ip_address_prefix_sets,
            ["/Compute-mydomain/user@example.com/corp"]
        );
        assert_eq!(wire.description.as_deref(), Some("web tier"));
        assert_eq!(wire.flow_direction, "egress");
    }

    #[test]
    fn test_decode_unqualifies_and_tolerates_nulls() {
        let body = json!({
            "name": "/Compute-mydomain/user@example.com/rule1",
            "flowDirection": "ingress",
            "enabledFlag": true,
            "acl": null,
            "secProtocols": ["/Compute-mydomain/user@example.com/ssh", "/oracle/public/https"],
            "srcIpAddressPrefixSets": null,
            "uri": "https://api.example.com/network/v1/secrule/Compute-mydomain/user@example.com/rule1"
        })
        .to_string();

        let info = client().decode(&body).unwrap();
        assert_eq!(info.name, "rule1");
        assert_eq!(info.acl, "");
        assert_eq!(info.sec_protocols, ["ssh", "/oracle/public/https"]);
        assert!(info.src_ip_address_prefix_sets.is_empty());
        assert!(info.tags.is_empty());
        assert!(info.uri.ends_with("/rule1"));
    }

    #[test]
    fn test_object_path() {
        assert_eq!(
            client().object_path("rule1"),
            "/network/v1/secrule/Compute-mydomain/user@example.com/rule1"
        );
    }
}
