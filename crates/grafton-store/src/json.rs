//! Helpers over `serde_json::Value` documents.

use serde_json::{Map, Value};

/// Apply an RFC 7396 JSON merge patch to `target`.
///
/// Object members in the patch replace (or, when `null`, remove) the matching
/// members of the target recursively; any non-object patch replaces the
/// target wholesale.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Look up the value at `segments` inside `doc`.
pub fn lookup<'v>(doc: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    segments.iter().try_fold(doc, |node, segment| match node {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Store `value` at `segments`, creating intermediate objects as needed.
pub fn set_at(doc: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *doc = value;
        return;
    };
    let mut node = doc;
    for segment in parents {
        node = object_of(node)
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_of(node).insert((*last).to_string(), value);
}

/// The map inside `node`, replacing any non-object value with `{}` first.
fn object_of(node: &mut Value) -> &mut Map<String, Value> {
    match node {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            object_of(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_rfc7396_examples() {
        let mut doc = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut doc, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(doc, json!({"a": "z", "c": {"d": "e"}}));

        let mut doc = json!({"a": ["b"]});
        merge_patch(&mut doc, &json!({"a": "c"}));
        assert_eq!(doc, json!({"a": "c"}));

        let mut doc = json!(["a", "b"]);
        merge_patch(&mut doc, &json!({"a": "b"}));
        assert_eq!(doc, json!({"a": "b"}));

        let mut doc = json!({"e": null});
        merge_patch(&mut doc, &json!({"a": 1}));
        assert_eq!(doc, json!({"e": null, "a": 1}));
    }

    #[test]
    fn lookup_objects_and_arrays() {
        let doc = json!({"rules": {"data": {"read": "true"}}, "list": [1, 2]});
        assert_eq!(lookup(&doc, &["rules", "data", "read"]), Some(&json!("true")));
        assert_eq!(lookup(&doc, &["list", "1"]), Some(&json!(2)));
        assert_eq!(lookup(&doc, &["missing"]), None);
        assert_eq!(lookup(&doc, &[]), Some(&doc));
    }

    #[test]
    fn set_at_creates_parents() {
        let mut doc = json!({});
        set_at(&mut doc, &["rules", "graft", "read"], json!("false"));
        assert_eq!(doc, json!({"rules": {"graft": {"read": "false"}}}));
        set_at(&mut doc, &["rules", "graft", "read"], json!("true"));
        assert_eq!(doc["rules"]["graft"]["read"], json!("true"));
    }
}
