//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way the host would,
//! without a host process. [`InMemorySecurityRules`] stands in for the
//! compute API so reconciler behaviour can be checked without HTTP.
//!
//! # Example
//!
//! ```ignore
//! use opc_provider::testing::{InMemorySecurityRules, ProviderTester};
//! use opc_provider::OpcProvider;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_create_rule() {
//!     let api = Arc::new(InMemorySecurityRules::new());
//!     let tester = ProviderTester::new(OpcProvider::with_security_rules(api));
//!
//!     let state = tester
//!         .lifecycle_create("opc_compute_security_rule", json!({
//!             "name": "rule1",
//!             "flow_direction": "ingress"
//!         }))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state["id"], "rule1");
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{
    CreateSecurityRuleInput, DeleteSecurityRuleInput, GetSecurityRuleInput, SecurityRuleInfo,
    SecurityRuleInput, SecurityRulesApi, UpdateSecurityRuleInput,
};
use crate::error::{ApiError, ProviderError};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::ID_ATTRIBUTE;

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for driving it without a host.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Run a full CRUD lifecycle: create → read → update → read → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state.clone(), updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;
        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// In-memory compute API
// =========================================================================

/// Security rule operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityRuleOperation {
    /// `create_security_rule`
    Create,
    /// `get_security_rule`
    Get,
    /// `update_security_rule`
    Update,
    /// `delete_security_rule`
    Delete,
}

/// A request [`InMemorySecurityRules`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    /// A create with its body.
    Create(SecurityRuleInput),
    /// A get of the named rule.
    Get(String),
    /// An update with its body.
    Update(SecurityRuleInput),
    /// A delete of the named rule.
    Delete(String),
}

/// [`SecurityRulesApi`] backed by a map, recording every request.
///
/// Missing rules answer with a 404 like the real API. Stored rules get a
/// `uri` under `https://api.example.com/network/v1/secrule/`.
#[derive(Debug, Default)]
pub struct InMemorySecurityRules {
    rules: Mutex<BTreeMap<String, SecurityRuleInfo>>,
    requests: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<HashMap<SecurityRuleOperation, (u16, String)>>,
    empty_gets: Mutex<bool>,
}

impl InMemorySecurityRules {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a rule as if it had been created out of band.
    pub fn insert(&self, mut info: SecurityRuleInfo) {
        if info.uri.is_empty() {
            info.uri = rule_uri(&info.name);
        }
        lock(&self.rules).insert(info.name.clone(), info);
    }

    /// Drop a rule as if it had been deleted out of band.
    pub fn remove(&self, name: &str) -> Option<SecurityRuleInfo> {
        lock(&self.rules).remove(name)
    }

    /// The stored rule, if any.
    pub fn get(&self, name: &str) -> Option<SecurityRuleInfo> {
        lock(&self.rules).get(name).cloned()
    }

    /// Fail the next call of `operation` with the given HTTP status.
    pub fn fail_next(&self, operation: SecurityRuleOperation, status: u16, message: &str) {
        lock(&self.failures).insert(operation, (status, message.to_string()));
    }

    /// Make gets of existing rules return an empty result.
    pub fn return_empty_on_get(&self, empty: bool) {
        *lock(&self.empty_gets) = empty;
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Body of the most recent create.
    pub fn last_create(&self) -> Option<SecurityRuleInput> {
        self.requests().into_iter().rev().find_map(|r| match r {
            RecordedRequest::Create(input) => Some(input),
            _ => None,
        })
    }

    /// Body of the most recent update.
    pub fn last_update(&self) -> Option<SecurityRuleInput> {
        self.requests().into_iter().rev().find_map(|r| match r {
            RecordedRequest::Update(input) => Some(input),
            _ => None,
        })
    }

    fn record(&self, operation: SecurityRuleOperation, request: RecordedRequest) -> Result<(), ApiError> {
        lock(&self.requests).push(request);
        match lock(&self.failures).remove(&operation) {
            Some((status, message)) => Err(ApiError::Status { status, message }),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn rule_uri(name: &str) -> String {
    format!("https://api.example.com/network/v1/secrule/{}", name)
}

fn not_found(name: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("Security rule {} not found", name),
    }
}

fn stored(input: &SecurityRuleInput) -> SecurityRuleInfo {
    SecurityRuleInfo {
        name: input.name.clone(),
        flow_direction: input.flow_direction.clone(),
        enabled: input.enabled,
        acl: input.acl.clone().unwrap_or_default(),
        src_vnic_set: input.src_vnic_set.clone().unwrap_or_default(),
        dst_vnic_set: input.dst_vnic_set.clone().unwrap_or_default(),
        sec_protocols: input.sec_protocols.clone(),
        src_ip_address_prefix_sets: input.src_ip_address_prefix_sets.clone(),
        dst_ip_address_prefix_sets: input.dst_ip_address_prefix_sets.clone(),
        tags: input.tags.clone(),
        description: input.description.clone().unwrap_or_default(),
        uri: rule_uri(&input.name),
    }
}

#[async_trait]
impl SecurityRulesApi for InMemorySecurityRules {
    async fn create_security_rule(
        &self,
        input: &CreateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError> {
        self.record(SecurityRuleOperation::Create, RecordedRequest::Create(input.clone()))?;
        let mut rules = lock(&self.rules);
        if rules.contains_key(&input.name) {
            return Err(ApiError::Status {
                status: 409,
                message: format!("Security rule {} already exists", input.name),
            });
        }
        let info = stored(input);
        rules.insert(info.name.clone(), info.clone());
        Ok(info)
    }

    async fn get_security_rule(
        &self,
        input: &GetSecurityRuleInput,
    ) -> Result<Option<SecurityRuleInfo>, ApiError> {
        self.record(SecurityRuleOperation::Get, RecordedRequest::Get(input.name.clone()))?;
        let info = self.get(&input.name).ok_or_else(|| not_found(&input.name))?;
        if *lock(&self.empty_gets) {
            return Ok(None);
        }
        Ok(Some(info))
    }

    async fn update_security_rule(
        &self,
        input: &UpdateSecurityRuleInput,
    ) -> Result<SecurityRuleInfo, ApiError> {
        self.record(SecurityRuleOperation::Update, RecordedRequest::Update(input.clone()))?;
        let mut rules = lock(&self.rules);
        if !rules.contains_key(&input.name) {
            return Err(not_found(&input.name));
        }
        let info = stored(input);
        rules.insert(info.name.clone(), info.clone());
        Ok(info)
    }

    async fn delete_security_rule(&self, input: &DeleteSecurityRuleInput) -> Result<(), ApiError> {
        self.record(SecurityRuleOperation::Delete, RecordedRequest::Delete(input.name.clone()))?;
        lock(&self.rules)
            .remove(&input.name)
            .map(|_| ())
            .ok_or_else(|| not_found(&input.name))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that a state returned by read marks the resource as gone.
///
/// # Panics
///
/// Panics if the state still carries an id.
pub fn assert_resource_gone(state: &Value) {
    let id = state.get(ID_ATTRIBUTE).filter(|id| !id.is_null());
    assert!(
        id.is_none(),
        "Expected the resource to be gone, but its id is {:?}",
        id
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OpcProvider;
    use crate::resources::SECURITY_RULE_TYPE;
    use serde_json::json;
    use std::sync::Arc;

    fn tester() -> (Arc<InMemorySecurityRules>, ProviderTester<OpcProvider>) {
        let api = Arc::new(InMemorySecurityRules::new());
        let tester = ProviderTester::new(OpcProvider::with_security_rules(api.clone()));
        (api, tester)
    }

    #[tokio::test]
    async fn test_tester_resource_types() {
        let (_, tester) = tester();
        assert_eq!(tester.resource_types(), vec![SECURITY_RULE_TYPE.to_string()]);
        assert!(tester.schema().provider.attribute("endpoint").is_some());
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud() {
        let (api, tester) = tester();
        let final_state = tester
            .lifecycle_crud(
                SECURITY_RULE_TYPE,
                json!({"name": "rule1", "flow_direction": "ingress"}),
                json!({"name": "rule1", "flow_direction": "egress"}),
            )
            .await
            .unwrap();

        assert_eq!(final_state["flow_direction"], "egress");
        assert_eq!(final_state["id"], "rule1");
        assert!(api.get("rule1").is_none());
        assert!(matches!(
            api.requests().last(),
            Some(RecordedRequest::Delete(name)) if name == "rule1"
        ));
    }

    #[tokio::test]
    async fn test_fake_failure_applies_once() {
        let api = InMemorySecurityRules::new();
        api.fail_next(SecurityRuleOperation::Get, 503, "busy");
        api.insert(SecurityRuleInfo {
            name: "rule1".to_string(),
            ..Default::default()
        });
        let input = GetSecurityRuleInput {
            name: "rule1".to_string(),
        };

        let err = api.get_security_rule(&input).await.unwrap_err();
        assert!(err.is_retryable());
        let info = api.get_security_rule(&input).await.unwrap().unwrap();
        assert!(info.uri.ends_with("/rule1"));
        assert_eq!(api.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fake_rejects_duplicate_create() {
        let api = InMemorySecurityRules::new();
        let input = SecurityRuleInput {
            name: "rule1".to_string(),
            ..Default::default()
        };
        api.create_security_rule(&input).await.unwrap();
        let err = api.create_security_rule(&input).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 409, .. }));
    }

    #[test]
    fn test_assert_resource_gone() {
        assert_resource_gone(&json!({"id": null, "name": "rule1"}));
        assert_resource_gone(&json!({}));
    }

    #[test]
    #[should_panic(expected = "Expected the resource to be gone")]
    fn test_assert_resource_gone_fails() {
        assert_resource_gone(&json!({"id": "rule1"}));
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid endpoint URI")];
        assert_error_contains(&diagnostics, "endpoint");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Missing required attribute").with_attribute("name"),
            Diagnostic::error("Error creating Security Rule").with_detail("400: bad acl"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("Missing required attribute"));
        assert!(display.contains("(at name)"));
        assert!(display.contains("400: bad acl"));
    }
}
