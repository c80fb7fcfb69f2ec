//! Resources managed by the provider.

pub mod security_rule;

pub use security_rule::{
    security_rule_schema, SecurityRuleResource, SecurityRuleState, SECURITY_RULE_TYPE,
};
