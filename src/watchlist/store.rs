use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::error::{AppError, Result};
use crate::types::normalize_asset_id;
use crate::watchlist::storage::OrderedSetStorage;

/// The user's ordered, duplicate-free list of asset ids.
///
/// Every mutation holds `ids` for the whole read-modify-persist cycle, and
/// memory is only updated once the new sequence has been saved.
pub struct WatchlistStore {
    storage: Arc<dyn OrderedSetStorage>,
    ids: Mutex<Vec<String>>,
}

impl WatchlistStore {
    pub fn load(storage: Arc<dyn OrderedSetStorage>) -> Result<Arc<Self>> {
        let ids = storage.load()?.unwrap_or_default();

        // A hand-edited file may carry mixed case or repeats. Keep first
        // occurrences. An entry that is not a valid id fails the load: dropping
        // it here would erase it from disk on the next save.
        let mut canonical: Vec<String> = Vec::with_capacity(ids.len());
        for (idx, raw) in ids.iter().enumerate() {
            let id = normalize_asset_id(raw).map_err(|e| AppError::StorageCorrupt {
                path: storage.location(),
                reason: format!("entry {idx} {raw:?}: {e}"),
            })?;
            if !canonical.contains(&id) {
                canonical.push(id);
            }
        }
        info!("Watchlist loaded with {} entries", canonical.len());

        Ok(Arc::new(Self {
            storage,
            ids: Mutex::new(canonical),
        }))
    }

    /// Returns `true` if the id was appended, `false` if it was already present.
    pub fn add(&self, raw_id: &str) -> Result<bool> {
        let id = normalize_asset_id(raw_id)?;
        let mut ids = self.lock();
        if ids.contains(&id) {
            return Ok(false);
        }
        let mut next = ids.clone();
        next.push(id.clone());
        self.storage.save(&next)?;
        *ids = next;
        info!("Added {id} to watchlist ({} entries)", ids.len());
        Ok(true)
    }

    /// Returns `true` if the id was removed, `false` if it was not present.
    pub fn remove(&self, raw_id: &str) -> Result<bool> {
        let id = normalize_asset_id(raw_id)?;
        let mut ids = self.lock();
        let Some(pos) = ids.iter().position(|existing| *existing == id) else {
            return Ok(false);
        };
        let mut next = ids.clone();
        next.remove(pos);
        self.storage.save(&next)?;
        *ids = next;
        info!("Removed {id} from watchlist ({} entries)", ids.len());
        Ok(true)
    }

    pub fn list(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// `ids` is only ever replaced wholesale, so a poisoned guard still holds
    /// a consistent sequence.
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::watchlist::storage::{JsonFileStorage, MemoryStorage};

    fn store_with(ids: &[&str]) -> (Arc<MemoryStorage>, Arc<WatchlistStore>) {
        let storage = Arc::new(MemoryStorage::with_ids(ids));
        let store = WatchlistStore::load(storage.clone()).unwrap();
        (storage, store)
    }

    #[test]
    fn repeated_add_keeps_single_entry() {
        let (storage, store) = store_with(&[]);
        assert!(store.add("bitcoin").unwrap());
        assert!(!store.add("bitcoin").unwrap());
        assert!(!store.add("  BITCOIN ").unwrap());

        assert_eq!(store.list(), vec!["bitcoin"]);
        assert_eq!(storage.snapshot().unwrap(), vec!["bitcoin"]);
    }

    #[test]
    fn add_preserves_insertion_order() {
        let (_, store) = store_with(&[]);
        for id in ["solana", "bitcoin", "ethereum"] {
            store.add(id).unwrap();
        }
        assert_eq!(store.list(), vec!["solana", "bitcoin", "ethereum"]);
    }

    #[test]
    fn remove_absent_id_leaves_watchlist_unchanged() {
        let (storage, store) = store_with(&["bitcoin", "ethereum"]);
        assert!(!store.remove("nonexistent").unwrap());
        assert_eq!(store.list(), vec!["bitcoin", "ethereum"]);
        assert_eq!(storage.snapshot().unwrap(), vec!["bitcoin", "ethereum"]);
    }

    #[test]
    fn remove_normalizes_and_persists() {
        let (storage, store) = store_with(&["bitcoin", "ethereum", "solana"]);
        assert!(store.remove(" Ethereum").unwrap());
        assert_eq!(store.list(), vec!["bitcoin", "solana"]);
        assert_eq!(storage.snapshot().unwrap(), vec!["bitcoin", "solana"]);
    }

    #[test]
    fn empty_id_is_rejected() {
        let (_, store) = store_with(&[]);
        assert!(matches!(store.add("  "), Err(AppError::Validation(_))));
        assert!(matches!(store.remove(""), Err(AppError::Validation(_))));
    }

    #[test]
    fn list_is_an_independent_copy() {
        let (_, store) = store_with(&["bitcoin"]);
        let mut copy = store.list();
        copy.push("dogecoin".to_string());
        copy.clear();
        assert_eq!(store.list(), vec!["bitcoin"]);
    }

    #[test]
    fn failed_save_does_not_change_memory() {
        let (storage, store) = store_with(&["bitcoin"]);
        storage.fail_saves(true);
        assert!(store.add("ethereum").is_err());
        assert!(store.remove("bitcoin").is_err());
        assert_eq!(store.list(), vec!["bitcoin"]);
    }

    #[test]
    fn load_canonicalizes_hand_edited_entries() {
        let (_, store) = store_with(&["Bitcoin", "bitcoin", "ETHEREUM"]);
        assert_eq!(store.list(), vec!["bitcoin", "ethereum"]);
    }

    #[test]
    fn invalid_stored_entry_fails_load_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        let original = r#"["bitcoin", "wrapped bitcoin", "ethereum"]"#;
        std::fs::write(&path, original).unwrap();

        let result = WatchlistStore::load(Arc::new(JsonFileStorage::new(&path)));
        match result {
            Err(AppError::StorageCorrupt { path: p, reason }) => {
                assert_eq!(p, path.display().to_string());
                assert!(reason.contains("wrapped bitcoin"), "{reason}");
            }
            Err(other) => panic!("expected StorageCorrupt, got {other:?}"),
            Ok(_) => panic!("load accepted an invalid entry"),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn survives_restart_through_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        {
            let store = WatchlistStore::load(Arc::new(JsonFileStorage::new(&path))).unwrap();
            store.add("bitcoin").unwrap();
            store.add("cardano").unwrap();
        }
        let reopened = WatchlistStore::load(Arc::new(JsonFileStorage::new(&path))).unwrap();
        assert_eq!(reopened.list(), vec!["bitcoin", "cardano"]);
    }

    #[test]
    fn corrupt_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        std::fs::write(&path, "[\"bitcoin\"").unwrap();
        let result = WatchlistStore::load(Arc::new(JsonFileStorage::new(&path)));
        assert!(matches!(result, Err(AppError::StorageCorrupt { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[\"bitcoin\"");
    }

    #[test]
    fn concurrent_adds_are_serialized() {
        let (storage, store) = store_with(&[]);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.add(&format!("coin-{}", i % 4)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let ids = store.list();
        assert_eq!(ids.len(), 4);
        assert_eq!(storage.snapshot().unwrap(), ids);
    }
}
