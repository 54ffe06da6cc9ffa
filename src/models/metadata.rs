//! Key/value annotations attached to every stored object.
//!
//! Metadata sets are small (providers cap them at a few KB of headers), so the
//! membership helpers scan snapshots linearly instead of keeping an index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Raw mapping handed to and received from the storage capability.
pub type Record = BTreeMap<String, String>;

/// String-to-string annotations of an object.
///
/// Two accessors expose the backing map with different aliasing rules:
/// - [`Metadata::to_record`] returns a copy; mutating it never affects `self`.
/// - [`Metadata::as_record`] / [`Metadata::as_record_mut`] return the live map.
///   The upload path in `BucketInternal` passes `as_record()` directly to the
///   storage capability so no copy is made per request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Metadata {
    entries: Record,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, or `None` when absent. Never substitutes a default.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Upsert; an existing value is overwritten.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Remove `key`. No-op when absent.
    pub fn delete(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of the keys at call time.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Snapshot of the values at call time.
    pub fn values(&self) -> Vec<String> {
        self.entries.values().cloned().collect()
    }

    /// Snapshot of the entries at call time.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    pub fn contains_value(&self, value: &str) -> bool {
        self.values().iter().any(|v| v == value)
    }

    /// True when `pair` is present with exactly that value.
    pub fn contains(&self, pair: (&str, &str)) -> bool {
        self.pairs()
            .iter()
            .any(|(k, v)| k == pair.0 && v == pair.1)
    }

    /// Defensive copy of the backing map.
    pub fn to_record(&self) -> Record {
        self.entries.clone()
    }

    /// Live, read-only view of the backing map.
    pub fn as_record(&self) -> &Record {
        &self.entries
    }

    /// Live backing map; changes made through it are visible to `get`.
    pub fn as_record_mut(&mut self) -> &mut Record {
        &mut self.entries
    }
}

impl From<Record> for Metadata {
    fn from(entries: Record) -> Self {
        Self { entries }
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(map: HashMap<String, String>) -> Self {
        Self {
            entries: map.into_iter().collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_value_until_overwritten_or_deleted() {
        let mut meta = Metadata::new();
        assert!(meta.is_empty());
        assert_eq!(meta.get("author"), None);

        meta.set("author", "ada");
        assert_eq!(meta.get("author"), Some("ada"));

        meta.set("author", "grace");
        assert_eq!(meta.get("author"), Some("grace"));
        assert_eq!(meta.len(), 1);

        meta.delete("author");
        assert_eq!(meta.get("author"), None);
        assert!(meta.is_empty());

        // deleting again is a no-op
        meta.delete("author");
        assert!(meta.is_empty());
    }

    #[test]
    fn clear_drops_every_entry() {
        let mut meta: Metadata = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(meta.len(), 2);
        meta.clear();
        assert!(meta.is_empty());
        assert!(meta.keys().is_empty());
    }

    #[test]
    fn snapshots_do_not_follow_later_mutation() {
        let mut meta: Metadata = [("a", "1")].into_iter().collect();
        let keys = meta.keys();
        let pairs = meta.pairs();
        meta.set("b", "2");
        meta.delete("a");
        assert_eq!(keys, vec!["a".to_string()]);
        assert_eq!(pairs, vec![("a".to_string(), "1".to_string())]);
    }

    #[test]
    fn membership_checks() {
        let meta: Metadata = [("content-type", "image/png"), ("owner", "ops")]
            .into_iter()
            .collect();
        assert!(meta.contains_key("owner"));
        assert!(!meta.contains_key("missing"));
        assert!(meta.contains_value("image/png"));
        assert!(!meta.contains_value("text/plain"));
        assert!(meta.contains(("owner", "ops")));
        assert!(!meta.contains(("owner", "dev")));
    }

    #[test]
    fn to_record_is_a_copy() {
        let mut meta: Metadata = [("a", "1")].into_iter().collect();
        let mut copy = meta.to_record();
        copy.insert("a".into(), "changed".into());
        copy.insert("b".into(), "2".into());
        assert_eq!(meta.get("a"), Some("1"));
        assert_eq!(meta.get("b"), None);

        meta.set("c", "3");
        assert!(!copy.contains_key("c"));
    }

    #[test]
    fn as_record_mut_is_live() {
        let mut meta: Metadata = [("a", "1")].into_iter().collect();
        meta.as_record_mut().insert("a".into(), "changed".into());
        meta.as_record_mut().insert("b".into(), "2".into());
        assert_eq!(meta.get("a"), Some("changed"));
        assert_eq!(meta.get("b"), Some("2"));
        assert_eq!(meta.as_record().len(), 2);
    }

    #[test]
    fn serializes_as_flat_map() {
        let meta: Metadata = [("k", "v")].into_iter().collect();
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"k":"v"}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
