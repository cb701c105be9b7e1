//! Deep merge and path lookup over the form answer tree.

use crate::models::FormData;
use serde_json::Value;

/// Recursive key-wise merge of `patch` into `target`.
///
/// Objects on both sides merge recursively; every other combination
/// (scalars, arrays, type changes) replaces the existing value wholesale.
/// Keys absent from `patch` are never touched, and applying the same patch
/// twice equals applying it once.
pub fn deep_merge(target: &mut FormData, patch: &FormData) {
    for (key, incoming) in patch {
        if let Value::Object(incoming_map) = incoming {
            if let Some(Value::Object(existing)) = target.get_mut(key) {
                deep_merge(existing, incoming_map);
                continue;
            }
        }
        target.insert(key.clone(), incoming.clone());
    }
}

/// Resolves a dot-separated path; numeric segments index into arrays
pub fn lookup<'a>(form: &'a FormData, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let mut current = form.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Whether a value counts as an answer for a required field
pub fn is_answered(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(value: Value) -> FormData {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_merge_keeps_siblings() {
        let mut data = FormData::new();
        deep_merge(&mut data, &form(json!({"a": {"x": 1}})));
        deep_merge(&mut data, &form(json!({"a": {"y": 2}})));

        assert_eq!(Value::Object(data), json!({"a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut base = form(json!({"site": {"name": "Depot", "floors": [1, 2]}, "ok": true}));
        let patch = form(json!({"site": {"floors": [3], "meta": {"k": "v"}}, "note": null}));

        let mut once = base.clone();
        deep_merge(&mut once, &patch);
        deep_merge(&mut base, &patch);
        deep_merge(&mut base, &patch);

        assert_eq!(base, once);
    }

    #[test]
    fn test_merge_replaces_arrays_and_type_changes() {
        let mut data = form(json!({"tags": ["a", "b"], "level": {"deep": 1}}));
        deep_merge(&mut data, &form(json!({"tags": ["c"], "level": 5})));

        assert_eq!(Value::Object(data), json!({"tags": ["c"], "level": 5}));
    }

    #[test]
    fn test_lookup_paths() {
        let data = form(json!({"site": {"rooms": [{"name": "Boiler"}]}, "n": 0}));

        assert_eq!(lookup(&data, "site.rooms.0.name"), Some(&json!("Boiler")));
        assert_eq!(lookup(&data, "n"), Some(&json!(0)));
        assert_eq!(lookup(&data, "site.rooms.1.name"), None);
        assert_eq!(lookup(&data, "n.deeper"), None);
        assert_eq!(lookup(&data, ""), None);
    }

    #[test]
    fn test_is_answered() {
        assert!(!is_answered(&json!(null)));
        assert!(!is_answered(&json!("   ")));
        assert!(!is_answered(&json!([])));
        assert!(is_answered(&json!(false)));
        assert!(is_answered(&json!(0)));
        assert!(is_answered(&json!({"k": 1})));
    }
}
