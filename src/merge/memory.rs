//! Memory merge store: shallow key-wise merge of the per-aggregate fact map.
//!
//! Two write paths share the document: the oracle merge path (candidate wins
//! on key collision) and image-confirmation feedback, which is injected
//! under a reserved key prefix as new unique keys and never overwritten.

use serde_json::{json, Value};

use crate::db::MemoryMap;

/// Keys under this prefix belong to the image-feedback path. The oracle
/// client strips them from proposed updates before they get here.
pub const RESERVED_MEMORY_PREFIX: &str = "visual_confirmation_";

/// Shallow merge: candidate wins on key collision. Values are taken as-is —
/// no deep merging of nested objects.
pub fn merge_memory(existing: &MemoryMap, updates: &MemoryMap) -> MemoryMap {
    let mut result = existing.clone();
    for (k, v) in updates {
        result.insert(k.clone(), v.clone());
    }
    result
}

/// Unique key for an image-confirmation entry, namespaced by search term.
/// Collides with nothing already in the map: `_2`, `_3`… on repeat
/// confirmations for the same term.
pub fn visual_confirmation_key(search_term: &str, existing: &MemoryMap) -> String {
    let slug: String = search_term
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let base = format!("{RESERVED_MEMORY_PREFIX}{slug}");
    if !existing.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let key = format!("{base}_{n}");
        if !existing.contains_key(&key) {
            return key;
        }
        n += 1;
    }
}

pub fn visual_confirmation_value(matches: bool, image_id: &str, timestamp: i64) -> Value {
    json!({
        "matches": matches,
        "image_id": image_id,
        "timestamp": timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> MemoryMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn candidate_wins_on_collision() {
        let existing = map(&[("sleep_pattern", json!("irregular"))]);
        let updates = map(&[("sleep_pattern", json!("improving"))]);
        let out = merge_memory(&existing, &updates);
        assert_eq!(out["sleep_pattern"], json!("improving"));
    }

    #[test]
    fn untouched_keys_preserved() {
        let existing = map(&[
            ("headache", json!({"severity": "moderate", "onset": "2 weeks ago"})),
            ("visual_confirmation_rash", json!({"matches": true})),
        ]);
        let updates = map(&[("sleep_pattern", json!("irregular"))]);
        let out = merge_memory(&existing, &updates);
        assert_eq!(out.len(), 3);
        assert_eq!(out["visual_confirmation_rash"], json!({"matches": true}));
    }

    #[test]
    fn empty_updates_identical_output() {
        let existing = map(&[("a", json!(1)), ("b", json!({"c": 2}))]);
        let out = merge_memory(&existing, &MemoryMap::new());
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            serde_json::to_string(&existing).unwrap()
        );
    }

    #[test]
    fn shallow_not_deep() {
        // Nested objects are replaced wholesale, not merged field-wise.
        let existing = map(&[("headache", json!({"severity": "mild", "onset": "monday"}))]);
        let updates = map(&[("headache", json!({"severity": "severe"}))]);
        let out = merge_memory(&existing, &updates);
        assert_eq!(out["headache"], json!({"severity": "severe"}));
    }

    #[test]
    fn confirmation_key_slugified() {
        let key = visual_confirmation_key("Skin Rash", &MemoryMap::new());
        assert_eq!(key, "visual_confirmation_skin_rash");
    }

    #[test]
    fn confirmation_key_unique_on_repeat() {
        let existing = map(&[
            ("visual_confirmation_skin_rash", json!({})),
            ("visual_confirmation_skin_rash_2", json!({})),
        ]);
        let key = visual_confirmation_key("skin rash", &existing);
        assert_eq!(key, "visual_confirmation_skin_rash_3");
    }

    #[test]
    fn confirmation_value_shape() {
        let v = visual_confirmation_value(true, "img-42", 1234);
        assert_eq!(v, json!({"matches": true, "image_id": "img-42", "timestamp": 1234}));
    }
}
