#![forbid(unsafe_code)]

use crate::bundle::BundleAccessor;
use serde_json::Value;
use std::collections::BTreeMap;

/// Bookkeeping fields never considered by change detection.
pub const EXCLUDED_FIELDS: &[&str] = &["id", "revision_id", "created", "changed", "default_revision"];

pub fn tracked_fields(accessor: &dyn BundleAccessor) -> Vec<&'static str> {
    accessor
        .fields()
        .iter()
        .copied()
        .filter(|field| !EXCLUDED_FIELDS.contains(field))
        .collect()
}

/// Absent, null, and empty containers all count as "not set".
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(entries)) => entries.is_empty(),
        Some(_) => false,
    }
}

/// Structural comparison of tracked field values between a candidate and its
/// last persisted revision. Going from set to empty (or back) is a change.
pub fn has_tracked_changes(
    accessor: &dyn BundleAccessor,
    candidate: &BTreeMap<String, Value>,
    previous: &BTreeMap<String, Value>,
) -> bool {
    for field in tracked_fields(accessor) {
        let next = candidate.get(field);
        let prior = previous.get(field);
        if is_empty_value(next) && is_empty_value(prior) {
            continue;
        }
        if next != prior {
            return true;
        }
    }
    false
}

/// A meta with no tracked field set carries no information and must never be
/// attached.
pub fn should_attach(accessor: &dyn BundleAccessor, fields: &BTreeMap<String, Value>) -> bool {
    tracked_fields(accessor)
        .iter()
        .any(|field| !is_empty_value(fields.get(*field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::StaticBundle;
    use serde_json::json;

    static VISUAL: StaticBundle = StaticBundle {
        bundle: "visual",
        fields: &["color", "weight", "id", "revision_id"],
        relation_bundle: "node_meta",
    };

    fn fields(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn bookkeeping_fields_are_excluded() {
        assert_eq!(tracked_fields(&VISUAL), vec!["color", "weight"]);

        let previous = fields(&[("color", json!("red")), ("id", json!("a"))]);
        let candidate = fields(&[("color", json!("red")), ("id", json!("b"))]);
        assert!(!has_tracked_changes(&VISUAL, &candidate, &previous));
    }

    #[test]
    fn value_change_is_detected() {
        let previous = fields(&[("color", json!("red"))]);
        let candidate = fields(&[("color", json!("blue"))]);
        assert!(has_tracked_changes(&VISUAL, &candidate, &previous));
    }

    #[test]
    fn empty_versus_set_is_a_change() {
        let previous = fields(&[("color", json!("red"))]);
        let cleared = fields(&[("color", Value::Null)]);
        assert!(has_tracked_changes(&VISUAL, &cleared, &previous));

        let absent = fields(&[]);
        assert!(has_tracked_changes(&VISUAL, &absent, &previous));
    }

    #[test]
    fn empty_representations_are_equivalent() {
        let previous = fields(&[("color", Value::Null)]);
        let candidate = fields(&[("color", json!(""))]);
        assert!(!has_tracked_changes(&VISUAL, &candidate, &previous));
    }

    #[test]
    fn attach_gating() {
        assert!(!should_attach(&VISUAL, &fields(&[])));
        assert!(!should_attach(&VISUAL, &fields(&[("color", json!(""))])));
        assert!(!should_attach(&VISUAL, &fields(&[("id", json!("a"))])));
        assert!(should_attach(&VISUAL, &fields(&[("weight", json!(3))])));
    }
}
