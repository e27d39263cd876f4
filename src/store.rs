//! Persisted per-load-balancer state records
//!
//! One record per load balancer name captures the identity fields needed to
//! skip re-discovery on subsequent runs. The record is written once at the
//! end of a successful creation and after successful member updates, never
//! mid-sequence, so a crash mid-creation leaves no stale entry and the next
//! run's discovery-by-name path picks up partially created cloud resources.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::cloud::{Member, MemberSet};

/// Errors raised by state store backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted identity fields for one load balancer
///
/// Members are stored as `[address, port]` pairs because JSON has no
/// tuple or set type; [`LbRecord::member_set`] and [`LbRecord::new`]
/// round-trip the in-memory set regardless of pair order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LbRecord {
    /// Managed security group id, if this component owns the group
    pub sg_id: Option<String>,
    /// Floating IP address, if one is managed
    pub fip: Option<String>,
    /// The VIP address
    pub address: Option<String>,
    /// Applied backend membership as address/port pairs
    #[serde(default)]
    pub members: Vec<(String, u16)>,
}

impl LbRecord {
    /// Build a record from resolved identity fields and the applied member set
    pub fn new(
        sg_id: Option<String>,
        fip: Option<String>,
        address: Option<String>,
        members: &MemberSet,
    ) -> Self {
        Self {
            sg_id,
            fip,
            address,
            members: members
                .iter()
                .map(|m| (m.address.clone(), m.port))
                .collect(),
        }
    }

    /// The stored membership as an explicit unordered set
    pub fn member_set(&self) -> MemberSet {
        self.members
            .iter()
            .map(|(address, port)| Member::new(address.clone(), *port))
            .collect()
    }
}

/// Key-value store of load balancer records
///
/// Injected into the reconciler rather than reached through a process-wide
/// singleton, so its lifetime is scoped to the reconciler's.
#[cfg_attr(test, automock)]
pub trait StateStore: Send + Sync {
    /// Fetch the record stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<LbRecord>, StoreError>;

    /// Store `record` under `key`, replacing any previous value
    fn set(&self, key: &str, record: &LbRecord) -> Result<(), StoreError>;
}

/// In-memory store, for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, LbRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<LbRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, record: &LbRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(key.to_string(), record.clone());
        Ok(())
    }
}

/// File-backed store holding all records in one JSON document
///
/// Writes go through a temporary file and an atomic rename so a crash
/// mid-write cannot truncate existing records.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the given path; the file is created on
    /// first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, LbRecord>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<LbRecord>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, record: &LbRecord) -> Result<(), StoreError> {
        let mut records = self.load()?;
        records.insert(key.to_string(), record.clone());
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(pairs: &[(&str, u16)]) -> MemberSet {
        pairs
            .iter()
            .map(|(addr, port)| Member::new(*addr, *port))
            .collect()
    }

    #[test]
    fn record_round_trips_member_set() {
        let set = members(&[("10.0.0.2", 8080), ("10.0.0.1", 80)]);
        let record = LbRecord::new(
            Some("sg_id".to_string()),
            None,
            Some("1.1.1.1".to_string()),
            &set,
        );
        assert_eq!(record.member_set(), set);
    }

    #[test]
    fn member_set_ignores_stored_pair_order() {
        let record = LbRecord {
            members: vec![("10.0.0.2".to_string(), 80), ("10.0.0.1".to_string(), 80)],
            ..Default::default()
        };
        let reversed = LbRecord {
            members: vec![("10.0.0.1".to_string(), 80), ("10.0.0.2".to_string(), 80)],
            ..Default::default()
        };
        assert_eq!(record.member_set(), reversed.member_set());
    }

    #[test]
    fn record_serializes_members_as_pairs() {
        let record = LbRecord::new(
            None,
            Some("4.4.4.4".to_string()),
            Some("1.1.1.1".to_string()),
            &members(&[("10.0.0.1", 80)]),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["members"], serde_json::json!([["10.0.0.1", 80]]));
        assert_eq!(json["fip"], "4.4.4.4");

        let back: LbRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn memory_store_get_set() {
        let store = MemoryStore::new();
        assert!(store.get("created_lbs.x").unwrap().is_none());

        let record = LbRecord::new(None, None, Some("1.1.1.1".to_string()), &members(&[]));
        store.set("created_lbs.x", &record).unwrap();
        assert_eq!(store.get("created_lbs.x").unwrap(), Some(record));
    }

    #[test]
    fn file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let record = LbRecord::new(
            Some("sg".to_string()),
            None,
            Some("1.1.1.1".to_string()),
            &members(&[("10.0.0.1", 80), ("10.0.0.2", 80)]),
        );
        JsonFileStore::new(&path).set("created_lbs.a", &record).unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("created_lbs.a").unwrap(), Some(record));
        assert!(reopened.get("created_lbs.b").unwrap().is_none());
    }

    #[test]
    fn file_store_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.get("created_lbs.a").unwrap().is_none());
    }

    #[test]
    fn file_store_set_keeps_other_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        let a = LbRecord::new(None, None, Some("1.1.1.1".to_string()), &members(&[]));
        let b = LbRecord::new(None, None, Some("2.2.2.2".to_string()), &members(&[]));
        store.set("created_lbs.a", &a).unwrap();
        store.set("created_lbs.b", &b).unwrap();

        assert_eq!(store.get("created_lbs.a").unwrap(), Some(a));
        assert_eq!(store.get("created_lbs.b").unwrap(), Some(b));
    }
}
