//! Which aggregates a source document belongs to, and how that changes.

use indexer_types::{value_as_id, AggregateConfig, Document, TypeConfig};
use serde_json::Value;
use tracing::debug;

/// An aggregate document built from one value of a source field.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRef {
    pub id: String,
    pub doc: Document,
}

/// Aggregates entering, staying in and leaving membership.
#[derive(Debug, Default, PartialEq)]
pub struct MembershipDiff {
    pub added: Vec<AggregateRef>,
    pub updated: Vec<AggregateRef>,
    pub removed: Vec<AggregateRef>,
}

/// Build the aggregates `doc` belongs to for one aggregate config.
///
/// The source field may be a scalar or an array; null, false, zero and empty
/// values contribute nothing. Ids come from the aggregate type's id function,
/// falling back to the built document's `id`. Duplicate ids are collapsed.
pub fn derive_aggregates(
    config: &AggregateConfig,
    aggregate_type: &TypeConfig,
    doc: Option<&Document>,
) -> Vec<AggregateRef> {
    let Some(doc) = doc else {
        return Vec::new();
    };
    let values: Vec<&Value> = match doc.get(&config.field) {
        Some(Value::Array(items)) => items.iter().filter(|v| is_truthy(v)).collect(),
        Some(value) if is_truthy(value) => vec![value],
        _ => Vec::new(),
    };

    let mut refs: Vec<AggregateRef> = Vec::with_capacity(values.len());
    for value in values {
        let built = (config.builder)(doc, value);
        let id = (aggregate_type.id_fn)(&built).or_else(|| built.get("id").and_then(value_as_id));
        match id {
            Some(id) if !refs.iter().any(|r| r.id == id) => refs.push(AggregateRef { id, doc: built }),
            Some(_) => {}
            None => debug!(
                aggregate = %config.name,
                "Skipping aggregate without id"
            ),
        }
    }
    refs
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Compare the memberships of the new and old document by aggregate id.
///
/// With `partial` set and no aggregate in the new set, the old aggregates are
/// reported as updated rather than removed: a partial document that omits the
/// field says nothing about membership.
pub fn diff_memberships(
    new_refs: &[AggregateRef],
    old_refs: &[AggregateRef],
    partial: bool,
) -> MembershipDiff {
    let mut diff = MembershipDiff::default();

    for new_ref in new_refs {
        if old_refs.iter().any(|old| old.id == new_ref.id) {
            diff.updated.push(new_ref.clone());
        } else {
            diff.added.push(new_ref.clone());
        }
    }

    for old_ref in old_refs {
        if new_refs.iter().any(|new| new.id == old_ref.id) {
            continue;
        }
        if partial && new_refs.is_empty() {
            diff.updated.push(old_ref.clone());
        } else {
            diff.removed.push(old_ref.clone());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn tag_config() -> AggregateConfig {
        AggregateConfig::new("tags", "tags", "tag", |_, value| {
            doc(json!({ "id": value, "name": value }))
        })
    }

    fn ids(refs: &[AggregateRef]) -> Vec<&str> {
        refs.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_derive_from_array_skips_falsy() {
        let source = doc(json!({"tags": ["x", "", null, "y", "x"]}));
        let refs = derive_aggregates(&tag_config(), &TypeConfig::new("tag"), Some(&source));
        assert_eq!(ids(&refs), vec!["x", "y"]);
        assert_eq!(refs[0].doc, doc(json!({"id": "x", "name": "x"})));
    }

    #[test]
    fn test_derive_from_scalar() {
        let source = doc(json!({"tags": "x"}));
        let refs = derive_aggregates(&tag_config(), &TypeConfig::new("tag"), Some(&source));
        assert_eq!(ids(&refs), vec!["x"]);
    }

    #[test]
    fn test_derive_missing_field_or_doc() {
        let source = doc(json!({"title": "no tags"}));
        let tag = TypeConfig::new("tag");
        assert!(derive_aggregates(&tag_config(), &tag, Some(&source)).is_empty());
        assert!(derive_aggregates(&tag_config(), &tag, None).is_empty());
    }

    #[test]
    fn test_derive_uses_aggregate_type_id() {
        let config = AggregateConfig::new("brand", "brand", "brand", |_, value| {
            doc(json!({ "slug": value }))
        });
        let brand = TypeConfig::new("brand").with_id_field("slug");
        let source = doc(json!({"brand": "acme"}));
        let refs = derive_aggregates(&config, &brand, Some(&source));
        assert_eq!(ids(&refs), vec!["acme"]);
    }

    #[test]
    fn test_diff_full_update() {
        let source_old = doc(json!({"tags": ["x", "y"]}));
        let source_new = doc(json!({"tags": ["y", "z"]}));
        let tag = TypeConfig::new("tag");
        let old_refs = derive_aggregates(&tag_config(), &tag, Some(&source_old));
        let new_refs = derive_aggregates(&tag_config(), &tag, Some(&source_new));

        let diff = diff_memberships(&new_refs, &old_refs, false);
        assert_eq!(ids(&diff.added), vec!["z"]);
        assert_eq!(ids(&diff.updated), vec!["y"]);
        assert_eq!(ids(&diff.removed), vec!["x"]);
    }

    #[test]
    fn test_diff_partial_without_field_keeps_membership() {
        let tag = TypeConfig::new("tag");
        let old_refs = derive_aggregates(&tag_config(), &tag, Some(&doc(json!({"tags": ["x"]}))));

        let diff = diff_memberships(&[], &old_refs, true);
        assert_eq!(ids(&diff.updated), vec!["x"]);
        assert!(diff.removed.is_empty());

        let diff = diff_memberships(&[], &old_refs, false);
        assert_eq!(ids(&diff.removed), vec!["x"]);
    }
}
