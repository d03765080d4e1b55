//! # Escrow Record Persistence
//!
//! Simple key-value persistence for escrow records with a single-writer
//! update entry point: all mutation goes through [`EscrowStore::update`]
//! under a per-store lock, so a poll-driven transition and a
//! user-driven unlock can never interleave on the same record.

use crate::error::{EscrowError, EscrowResult};
use crate::escrow::lifecycle::EscrowRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence collaborator for escrow records
pub trait EscrowStore {
    /// Load a record by id
    fn load(&self, id: &str) -> EscrowResult<Option<EscrowRecord>>;

    /// Insert or replace a record
    fn save(&self, record: &EscrowRecord) -> EscrowResult<()>;

    /// All known records
    fn list(&self) -> EscrowResult<Vec<EscrowRecord>>;

    /// Apply `apply` to the record under the store's write lock and
    /// persist the result, returning the updated record. If `apply`
    /// fails the record is left unchanged.
    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut EscrowRecord) -> EscrowResult<()>,
    ) -> EscrowResult<EscrowRecord>;
}

fn not_found(id: &str) -> EscrowError {
    EscrowError::operation("store", format!("no escrow with id {id}"))
}

/// In-memory store backed by a mutex-guarded map
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, EscrowRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EscrowStore for MemoryStore {
    fn load(&self, id: &str) -> EscrowResult<Option<EscrowRecord>> {
        let map = self.inner.lock().expect("store lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn save(&self, record: &EscrowRecord) -> EscrowResult<()> {
        let mut map = self.inner.lock().expect("store lock poisoned");
        map.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> EscrowResult<Vec<EscrowRecord>> {
        let map = self.inner.lock().expect("store lock poisoned");
        Ok(map.values().cloned().collect())
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut EscrowRecord) -> EscrowResult<()>,
    ) -> EscrowResult<EscrowRecord> {
        let mut map = self.inner.lock().expect("store lock poisoned");
        let record = map.get_mut(id).ok_or_else(|| not_found(id))?;
        // Mutate a copy so a failed apply leaves the stored record intact
        let mut updated = record.clone();
        apply(&mut updated)?;
        *record = updated.clone();
        Ok(updated)
    }
}

/// JSON file store: the whole record map serialized to one file,
/// rewritten on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> EscrowResult<HashMap<String, EscrowRecord>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let json = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn write_all(&self, map: &HashMap<String, EscrowRecord>) -> EscrowResult<()> {
        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl EscrowStore for JsonFileStore {
    fn load(&self, id: &str) -> EscrowResult<Option<EscrowRecord>> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        Ok(self.read_all()?.remove(id))
    }

    fn save(&self, record: &EscrowRecord) -> EscrowResult<()> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        let mut map = self.read_all()?;
        map.insert(record.id.clone(), record.clone());
        self.write_all(&map)
    }

    fn list(&self) -> EscrowResult<Vec<EscrowRecord>> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        Ok(self.read_all()?.into_values().collect())
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut EscrowRecord) -> EscrowResult<()>,
    ) -> EscrowResult<EscrowRecord> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        let mut map = self.read_all()?;
        let record = map.get_mut(id).ok_or_else(|| not_found(id))?;
        apply(record)?;
        let updated = record.clone();
        self.write_all(&map)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::lifecycle::Counterparties;
    use crate::escrow::script::ScriptSpec;
    use bitcoin::Network;

    fn sample_record() -> EscrowRecord {
        let mut pk = vec![0x02];
        pk.extend_from_slice(&[0x99; 32]);
        EscrowRecord::new(
            ScriptSpec::Timelock {
                unlock_height: 100,
                owner_pubkey: hex::encode(pk),
            },
            100_000,
            Counterparties::receiver_only("tb1qreceiver"),
            Network::Signet,
        )
        .unwrap()
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let record = sample_record();
        store.save(&record).unwrap();

        let loaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_update_applies_atomically() {
        let store = MemoryStore::new();
        let record = sample_record();
        store.save(&record).unwrap();

        let updated = store
            .update(&record.id, &mut |r| r.record_funding("ab".repeat(32)))
            .unwrap();
        assert!(updated.funding_txid.is_some());

        // A failing apply must leave the stored record unchanged
        let err = store.update(&record.id, &mut |r| {
            r.funding_txid = None;
            r.record_funding("cd".repeat(32))?;
            Err(EscrowError::operation("test", "forced failure"))
        });
        assert!(err.is_err());
        let reloaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(reloaded.funding_txid, Some("ab".repeat(32)));
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("satlock-test-{:08x}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(dir.join("escrows.json"));

        let record = sample_record();
        store.save(&record).unwrap();

        let loaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded.escrow_address, record.escrow_address);

        store
            .update(&record.id, &mut |r| r.record_funding("ef".repeat(32)))
            .unwrap();
        let reloaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(reloaded.funding_txid, Some("ef".repeat(32)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
