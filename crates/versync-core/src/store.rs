//! In-memory store for version records and tag keys.
//!
//! The store is the single mutable owner of the synchronized dataset. The
//! channel and file-load paths only ever produce candidate stores or keys
//! which are merged in; they never touch the internals directly.
//!
//! Merge semantics:
//! - version records deduplicate by identifier, later merges overwrite the
//!   metadata of an existing identifier
//! - tag keys are first-write-wins: a name already present keeps its value
//!   no matter what a later dump reports

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// One observed version of the monitored content.
///
/// `version` is the deduplication identifier; all other fields arrive from
/// the agent (or an imported document) and are carried through untyped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    #[serde(default)]
    pub version: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl VersionRecord {
    /// Create a record with no metadata fields.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// A record is valid when its identifier is non-empty and every
    /// dot-separated segment is a non-empty run of `[A-Za-z0-9_-]`.
    pub fn is_valid(&self) -> bool {
        !self.version.is_empty()
            && self.version.split('.').all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            })
    }
}

/// Compare two version identifiers segment-wise.
///
/// Numeric segments compare numerically ("1.9" < "1.10"), anything else
/// lexicographically; a shorter identifier that is a prefix of a longer one
/// sorts first.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// The synchronized dataset: ordered version records plus tag keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionStore {
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
    #[serde(default)]
    pub tag_keys: BTreeMap<String, u64>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every record and tag key from `other` into self.
    ///
    /// Records insert-or-overwrite by identifier; tag keys insert only when
    /// the name is absent. Total: unknown entries in `other` are simply
    /// absent keys, never errors. Callers re-sort after the batch.
    pub fn merge_from(&mut self, other: VersionStore) {
        for record in other.versions {
            match self
                .versions
                .iter_mut()
                .find(|r| r.version == record.version)
            {
                Some(existing) => *existing = record,
                None => self.versions.push(record),
            }
        }
        for (name, value) in other.tag_keys {
            self.tag_keys.entry(name).or_insert(value);
        }
    }

    /// Insert `name -> value` only if `name` is absent.
    ///
    /// Returns `true` when the key was new. Safe to call with already-known
    /// names; the existing value is never overwritten.
    pub fn merge_tag_key(&mut self, name: impl Into<String>, value: u64) -> bool {
        let mut inserted = false;
        self.tag_keys.entry(name.into()).or_insert_with(|| {
            inserted = true;
            value
        });
        inserted
    }

    /// Drop records that fail domain validity.
    ///
    /// Run on candidate stores built from untrusted input (imported files,
    /// live dumps) before merging; removal is silent by design of the import
    /// contract.
    pub fn trim_versions(&mut self) {
        let before = self.versions.len();
        self.versions.retain(VersionRecord::is_valid);
        let dropped = before - self.versions.len();
        if dropped > 0 {
            debug!("trim_versions: dropped {} malformed record(s)", dropped);
        }
    }

    /// Re-establish the ordering invariant.
    ///
    /// Stable and idempotent: records with equal ordering keys keep their
    /// relative insertion order. Called once per merge batch.
    pub fn sort_versions(&mut self) {
        self.versions
            .sort_by(|a, b| compare_versions(&a.version, &b.version));
    }

    /// Serialize the full store to a JSON document.
    pub fn to_document(&self) -> Vec<u8> {
        // Plain maps, strings, and numbers always serialize.
        serde_json::to_vec_pretty(self).expect("store serialization cannot fail")
    }

    /// Decode a store from a JSON document.
    ///
    /// All-or-nothing: malformed input yields a decode error and no store,
    /// so callers never observe a half-parsed result. Unknown fields are
    /// ignored, missing fields default to empty.
    pub fn from_document(bytes: &[u8], source_name: &str) -> Result<VersionStore> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Decode {
            source_name: source_name.to_string(),
            message: e.to_string(),
            cause: Some(e),
        })
    }

    /// Load a store from a JSON file.
    pub fn load(path: &Path) -> Result<VersionStore> {
        let bytes = fs::read(path).map_err(|e| SyncError::io_with_path(e, path))?;
        Self::from_document(&bytes, &path.display().to_string())
    }

    /// Write the store to a JSON file atomically (temp file + rename), so a
    /// crash mid-export never leaves a truncated document behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(&self.to_document())?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(|e| SyncError::io_with_path(e, path))
    }

    /// Number of version records.
    pub fn record_count(&self) -> usize {
        self.versions.len()
    }

    /// Look up a record by identifier.
    pub fn record(&self, version: &str) -> Option<&VersionRecord> {
        self.versions.iter().find(|r| r.version == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(version: &str, note: &str) -> VersionRecord {
        let mut r = VersionRecord::new(version);
        r.fields
            .insert("note".to_string(), serde_json::json!(note));
        r
    }

    fn store_with(records: &[(&str, &str)], keys: &[(&str, u64)]) -> VersionStore {
        let mut s = VersionStore::new();
        for (v, n) in records {
            s.versions.push(record(v, n));
        }
        for (k, val) in keys {
            s.tag_keys.insert(k.to_string(), *val);
        }
        s
    }

    #[test]
    fn test_merge_overwrites_record_by_identifier() {
        let mut store = VersionStore::new();
        store.merge_from(store_with(&[("1.0", "meta")], &[]));
        store.sort_versions();
        store.merge_from(store_with(&[("1.0", "meta2"), ("1.1", "meta3")], &[]));
        store.sort_versions();

        assert_eq!(store.record_count(), 2);
        assert_eq!(
            store.record("1.0").unwrap().fields["note"],
            serde_json::json!("meta2")
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = store_with(&[("1.0", "a"), ("2.0", "b")], &[("k1", 5)]);

        let mut once = VersionStore::new();
        once.merge_from(batch.clone());
        once.sort_versions();

        let mut twice = VersionStore::new();
        twice.merge_from(batch.clone());
        twice.merge_from(batch);
        twice.sort_versions();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_disjoint_tag_keys_commute() {
        let a = store_with(&[], &[("k1", 1), ("k2", 2)]);
        let b = store_with(&[], &[("k3", 3)]);

        let mut ab = VersionStore::new();
        ab.merge_from(a.clone());
        ab.merge_from(b.clone());

        let mut ba = VersionStore::new();
        ba.merge_from(b);
        ba.merge_from(a);

        assert_eq!(ab.tag_keys, ba.tag_keys);
    }

    #[test]
    fn test_tag_key_first_write_wins() {
        let mut store = VersionStore::new();
        assert!(store.merge_tag_key("k1", 5));
        assert!(!store.merge_tag_key("k1", 9));
        assert!(store.merge_tag_key("k2", 2));

        assert_eq!(store.tag_keys["k1"], 5);
        assert_eq!(store.tag_keys["k2"], 2);
    }

    #[test]
    fn test_merge_from_does_not_overwrite_tag_keys() {
        let mut store = store_with(&[], &[("k1", 5)]);
        store.merge_from(store_with(&[], &[("k1", 9), ("k2", 2)]));

        assert_eq!(store.tag_keys["k1"], 5);
        assert_eq!(store.tag_keys["k2"], 2);
    }

    #[test]
    fn test_sort_orders_numeric_segments() {
        let mut store = store_with(
            &[("1.10", "a"), ("1.2", "b"), ("1.9", "c")],
            &[],
        );
        store.sort_versions();

        let order: Vec<&str> = store.versions.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(order, vec!["1.2", "1.9", "1.10"]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        // "1.0" and "1.00" compare equal numerically but are distinct
        // identifiers; insertion order must survive the sort.
        let mut store = store_with(&[("1.0", "first"), ("1.00", "second")], &[]);
        store.sort_versions();
        store.sort_versions();

        assert_eq!(store.versions[0].version, "1.0");
        assert_eq!(store.versions[1].version, "1.00");
    }

    #[test]
    fn test_trim_drops_malformed_records() {
        let mut store = store_with(&[("1.0", "good"), ("", "empty"), ("1..2", "gap")], &[]);
        store.trim_versions();

        assert_eq!(store.record_count(), 1);
        assert_eq!(store.versions[0].version, "1.0");
    }

    #[test]
    fn test_prerelease_identifiers_are_valid() {
        assert!(VersionRecord::new("1.0-beta").is_valid());
        assert!(VersionRecord::new("2.3.4_rc1").is_valid());
        assert!(!VersionRecord::new("1.0 beta").is_valid());
    }

    #[test]
    fn test_document_round_trip() {
        let mut store = store_with(&[("1.0", "a"), ("2.0", "b")], &[("k1", 5), ("k2", 2)]);
        store.sort_versions();

        let bytes = store.to_document();
        let decoded = VersionStore::from_document(&bytes, "test").unwrap();

        assert_eq!(store, decoded);
    }

    #[test]
    fn test_from_document_rejects_malformed_json() {
        let result = VersionStore::from_document(b"{ not json", "test");
        assert!(matches!(result, Err(SyncError::Decode { .. })));
    }

    #[test]
    fn test_from_document_defaults_missing_fields() {
        let store = VersionStore::from_document(b"{}", "test").unwrap();
        assert!(store.versions.is_empty());
        assert!(store.tag_keys.is_empty());
    }

    #[test]
    fn test_from_document_ignores_unknown_fields() {
        let doc = br#"{"versions": [], "tagKeys": {"k": 7}, "extra": true}"#;
        let store = VersionStore::from_document(doc, "test").unwrap();
        assert_eq!(store.tag_keys["k"], 7);
    }

    #[test]
    fn test_record_metadata_round_trips_through_flatten() {
        let doc = br#"{"versions": [{"version": "1.0", "codec": "h264", "size": 12}]}"#;
        let store = VersionStore::from_document(doc, "test").unwrap();
        let rec = store.record("1.0").unwrap();
        assert_eq!(rec.fields["codec"], serde_json::json!("h264"));
        assert_eq!(rec.fields["size"], serde_json::json!(12));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.json");

        let mut store = store_with(&[("1.1", "x"), ("1.0", "y")], &[("k", 1)]);
        store.sort_versions();
        store.save(&path).unwrap();

        let loaded = VersionStore::load(&path).unwrap();
        assert_eq!(store, loaded);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = VersionStore::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(SyncError::Io { .. })));
    }
}
