use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value as JsonValue;
use switchyard_types::Value;
use switchyard_types::path::{RESOURCE_DELIMITER, SELF_REF, index_path, join_path};

/// Stored entry: a scalar value or an enum ordinal, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entry {
    Value(Value),
    Enum(i32),
}

impl Entry {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(value) => Some(value),
            Entry::Enum(_) => None,
        }
    }

    pub fn as_enum(&self) -> Option<i32> {
        match self {
            Entry::Enum(ordinal) => Some(*ordinal),
            Entry::Value(_) => None,
        }
    }
}

/// Thread-safe reference store.
///
/// Values and declared lengths live in two separately locked tables so a path can carry both without collision.
/// Entries are only ever inserted or overwritten; a failed decode leaves whatever it already wrote.
#[derive(Debug, Default)]
pub struct Store {
    values: Mutex<HashMap<String, Entry>>,
    lengths: Mutex<HashMap<String, usize>>,
}

/// Ordered copy of a store, used for diagnostics and command output.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StoreSnapshot {
    pub values: BTreeMap<String, Entry>,
    pub lengths: BTreeMap<String, usize>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry at `path`.
    pub fn store(&self, path: impl Into<String>, entry: Entry) {
        self.values.lock().expect("store values lock").insert(path.into(), entry);
    }

    pub fn store_value(&self, path: impl Into<String>, value: impl Into<Value>) {
        self.store(path, Entry::Value(value.into()));
    }

    pub fn store_enum(&self, path: impl Into<String>, ordinal: i32) {
        self.store(path, Entry::Enum(ordinal));
    }

    /// Load the entry at `path`. A trailing self-reference marker is ignored.
    pub fn load(&self, path: &str) -> Option<Entry> {
        let key = strip_self_reference(path);
        self.values.lock().expect("store values lock").get(key).cloned()
    }

    pub fn load_value(&self, path: &str) -> Option<Value> {
        match self.load(path)? {
            Entry::Value(value) => Some(value),
            Entry::Enum(_) => None,
        }
    }

    pub fn load_enum(&self, path: &str) -> Option<i32> {
        self.load(path)?.as_enum()
    }

    /// Declare or overwrite the element/field count at `path`.
    pub fn define(&self, path: impl Into<String>, length: usize) {
        self.lengths.lock().expect("store lengths lock").insert(path.into(), length);
    }

    /// Declared length at `path`, or 0 when nothing was declared.
    pub fn length(&self, path: &str) -> usize {
        let key = strip_self_reference(path);
        self.lengths.lock().expect("store lengths lock").get(key).copied().unwrap_or(0)
    }

    /// Whether a value or a length is stored at `path` or anywhere below it (`path.field`, `path[index]`).
    pub fn contains_below(&self, path: &str) -> bool {
        let key = strip_self_reference(path);
        let below = |candidate: &String| match candidate.strip_prefix(key) {
            Some(rest) => rest.is_empty() || key.ends_with(RESOURCE_DELIMITER) || rest.starts_with(['.', '[']),
            None => false,
        };
        self.values.lock().expect("store values lock").keys().any(below)
            || self.lengths.lock().expect("store lengths lock").keys().any(below)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.values.lock().expect("store values lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed the store from a JSON document rooted at `path` (for example `input:`).
    ///
    /// Objects and arrays declare their lengths, array elements are stored at `path[index]`, nulls are skipped.
    pub fn store_json(&self, path: &str, value: &JsonValue) {
        match value {
            JsonValue::Object(fields) => {
                self.define(path, fields.len());
                for (key, nested) in fields {
                    self.store_json(&join_path([path, key.as_str()]), nested);
                }
            }
            JsonValue::Array(items) => {
                self.define(path, items.len());
                for (index, item) in items.iter().enumerate() {
                    self.store_json(&index_path(path, index), item);
                }
            }
            other => {
                if let Some(scalar) = Value::from_json(other) {
                    self.store_value(path, scalar);
                }
            }
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let values = self.values.lock().expect("store values lock").iter().map(|(key, entry)| (key.clone(), entry.clone())).collect();
        let lengths = self.lengths.lock().expect("store lengths lock").iter().map(|(key, length)| (key.clone(), *length)).collect();
        StoreSnapshot { values, lengths }
    }
}

fn strip_self_reference(path: &str) -> &str {
    path.strip_suffix(SELF_REF).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn load_ignores_trailing_self_reference() {
        let store = Store::new();
        store.store_value("input:user", "bob");
        assert_eq!(store.load_value("input:user."), Some(Value::from("bob")));
        assert_eq!(store.load("input:missing"), None);
    }

    #[test]
    fn values_and_lengths_do_not_collide_on_the_same_path() {
        let store = Store::new();
        store.define("input:list", 2);
        store.store_enum("input:list", 1);
        assert_eq!(store.length("input:list"), 2);
        assert_eq!(store.load_enum("input:list"), Some(1));
        assert_eq!(store.load_value("input:list"), None);
        assert_eq!(store.length("input:undeclared"), 0);
    }

    #[test]
    fn contains_below_matches_whole_segments_only() {
        let store = Store::new();
        store.store_value("input:children[0].value", "b");
        store.define("input:tags", 1);

        assert!(store.contains_below("input:children"));
        assert!(store.contains_below("input:children[0]"));
        assert!(store.contains_below("input:tags"));
        assert!(store.contains_below("input:"));
        assert!(!store.contains_below("input:child"));
        assert!(!store.contains_below("input:children[1]"));
        assert!(!store.contains_below("output:"));
    }

    #[test]
    fn store_json_flattens_nested_documents() {
        let store = Store::new();
        store.store_json(
            "input:",
            &json!({
                "message": "hi",
                "list": ["a", "b"],
                "user": { "id": 7, "tags": [{ "key": "x" }] },
                "missing": null
            }),
        );

        assert_eq!(store.load_value("input:message"), Some(Value::from("hi")));
        assert_eq!(store.length("input:list"), 2);
        assert_eq!(store.load_value("input:list[1]"), Some(Value::from("b")));
        assert_eq!(store.load_value("input:user.id"), Some(Value::Int64(7)));
        assert_eq!(store.load_value("input:user.tags[0].key"), Some(Value::from("x")));
        assert_eq!(store.length("input:user"), 2);
        assert_eq!(store.load("input:missing"), None);
    }

    #[test]
    fn concurrent_writers_are_linearized_per_path() {
        let store = Arc::new(Store::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for index in 0..50 {
                        store.store_value(format!("node{worker}:value[{index}]"), i64::from(index));
                        store.define(format!("node{worker}:value"), index as usize + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker finished");
        }

        assert_eq!(store.len(), 400);
        assert_eq!(store.length("node3:value"), 50);
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let store = Store::new();
        store.store_value("input:b", "2");
        store.store_value("input:a", "1");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.values.keys().collect::<Vec<_>>(), vec!["input:a", "input:b"]);
    }
}
