//! Schema-driven planning.
//!
//! Diffs a prior state against the proposed configuration and reports the
//! attribute changes the apply step will make.

use serde_json::Value;

use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};
use crate::validation::{apply_defaults, ID_ATTRIBUTE};

/// Plan a resource change.
///
/// - `prior == None`: create. Every configured attribute is reported as added.
/// - `proposed` null: delete. Every prior attribute is reported as removed.
/// - otherwise: update. Computed attributes are carried over from the prior
///   state and a change to any `force_new` attribute requires replacement.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: Value) -> PlanResult {
    if proposed.is_null() {
        let changes = prior
            .map(|p| configured_attributes(schema, p))
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| AttributeChange::removed(name, value))
            .collect();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = proposed;
    apply_defaults(schema, &mut planned);

    let Some(prior) = prior.filter(|p| !p.is_null()) else {
        let changes = configured_attributes(schema, &planned)
            .into_iter()
            .map(|(name, value)| AttributeChange::added(name, value))
            .collect();
        return PlanResult::with_changes(planned, changes, false);
    };

    carry_computed(schema, prior, &mut planned);

    let mut changes = Vec::new();
    let mut requires_replace = false;
    for (name, attr) in &schema.attributes {
        if attr.flags.is_computed_only() {
            continue;
        }
        let before = set_value(prior.get(name));
        let after = set_value(planned.get(name));
        let change = match (before, after) {
            (None, None) => continue,
            (Some(b), Some(a)) if b == a => continue,
            (None, Some(a)) => AttributeChange::added(name.as_str(), a.clone()),
            (Some(b), None) => AttributeChange::removed(name.as_str(), b.clone()),
            (Some(b), Some(a)) => AttributeChange::modified(name.as_str(), b.clone(), a.clone()),
        };
        requires_replace |= attr.force_new;
        changes.push(change);
    }

    if changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

/// Null and empty strings or lists count as unset.
fn set_value(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    })
}

fn configured_attributes(schema: &Schema, state: &Value) -> Vec<(String, Value)> {
    schema
        .attributes
        .iter()
        .filter(|(_, attr)| !attr.flags.is_computed_only())
        .filter_map(|(name, _)| set_value(state.get(name)).map(|v| (name.clone(), v.clone())))
        .collect()
}

fn carry_computed(schema: &Schema, prior: &Value, planned: &mut Value) {
    let Value::Object(planned) = planned else {
        return;
    };
    let computed = schema
        .attributes
        .iter()
        .filter(|(_, attr)| attr.flags.is_computed_only())
        .map(|(name, _)| name.as_str())
        .chain(std::iter::once(ID_ATTRIBUTE));

    for name in computed {
        if let Some(value) = set_value(prior.get(name)) {
            planned.insert(name.to_string(), value.clone());
        }
    }
}
