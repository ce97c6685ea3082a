// Persistence of the user's route selection behind a swappable key-value store
use crate::ntm_models::{NTMError, Result, RouteSelection};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Minimal get/set store, so the selection can live in a file, in memory or anywhere else.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// A JSON object on disk mapping keys to raw string values.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("ntm");
        path.push("storage.json");
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let contents = fs::read(&self.path)
            .map_err(|e| NTMError::FileError(format!("Failed to read {:?}: {}", self.path, e)))?;

        serde_json::from_slice(&contents)
            .map_err(|e| NTMError::StorageError(format!("Corrupted store {:?}: {}", self.path, e)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(NTMError::StorageError(e)) => {
                warn!("{}; starting a fresh store", e);
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        entries.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| NTMError::FileError(format!("Failed to create {:?}: {}", parent, e)))?;
        }

        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| NTMError::StorageError(format!("Failed to serialize store: {}", e)))?;
        fs::write(&self.path, json)
            .map_err(|e| NTMError::FileError(format!("Failed to write {:?}: {}", self.path, e)))
    }
}

pub struct RouteFilterStore {
    store: Box<dyn KeyValueStore>,
}

impl RouteFilterStore {
    pub const KEY: &'static str = "routes";

    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        RouteFilterStore { store }
    }

    /// Never fails: a missing, unreadable or corrupted value is the empty selection.
    pub fn load(&self) -> RouteSelection {
        let raw = match self.store.get(Self::KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return RouteSelection::empty(),
            Err(e) => {
                warn!("Could not read saved routes ({}), showing all routes", e);
                return RouteSelection::empty();
            }
        };

        match serde_json::from_str::<RouteSelection>(&raw) {
            Ok(selection) => {
                debug!("Restored {} selected routes", selection.len());
                selection
            }
            Err(e) => {
                warn!("Saved routes are corrupted ({}), showing all routes", e);
                RouteSelection::empty()
            }
        }
    }

    /// Overwrites the stored selection with `selection` in full.
    pub fn save(&mut self, selection: &RouteSelection) -> Result<()> {
        let json = serde_json::to_string(selection)
            .map_err(|e| NTMError::StorageError(format!("Failed to serialize routes: {}", e)))?;
        self.store.set(Self::KEY, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntm_models::RouteOption;

    fn selection() -> RouteSelection {
        RouteSelection::new(vec![
            RouteOption::new("57", "57"),
            RouteOption::new("39", "39 Tchoupitoulas"),
            RouteOption::new("12", "12"),
        ])
    }

    #[test]
    fn missing_key_loads_empty() {
        let store = RouteFilterStore::new(Box::new(MemoryStore::new()));
        assert!(store.load().is_empty());
    }

    #[test]
    fn round_trips_selection_in_order() {
        let mut store = RouteFilterStore::new(Box::new(MemoryStore::new()));
        store.save(&selection()).unwrap();
        assert_eq!(store.load(), selection());

        store.save(&RouteSelection::empty()).unwrap();
        assert_eq!(store.load(), RouteSelection::empty());
    }

    #[test]
    fn corrupted_value_loads_empty() {
        let mut memory = MemoryStore::new();
        memory.set(RouteFilterStore::KEY, "{not json".to_string()).unwrap();
        let store = RouteFilterStore::new(Box::new(memory));
        assert!(store.load().is_empty());
    }

    #[test]
    fn wrong_shape_loads_empty() {
        let mut memory = MemoryStore::new();
        memory.set(RouteFilterStore::KEY, r#"{"value":"57"}"#.to_string()).unwrap();
        let store = RouteFilterStore::new(Box::new(memory));
        assert!(store.load().is_empty());
    }

    #[test]
    fn stored_duplicates_are_collapsed() {
        let mut memory = MemoryStore::new();
        memory
            .set(
                RouteFilterStore::KEY,
                r#"[{"value":"57","label":"57"},{"value":"57","label":"again"},{"value":"39","label":"39"}]"#.to_string(),
            )
            .unwrap();
        let store = RouteFilterStore::new(Box::new(memory));
        assert_eq!(store.load().values().collect::<Vec<_>>(), vec!["57", "39"]);
    }

    #[test]
    fn file_store_round_trips_and_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let mut file = FileStore::new(&path);
        file.set("theme", "dark".to_string()).unwrap();

        let mut store = RouteFilterStore::new(Box::new(FileStore::new(&path)));
        store.save(&selection()).unwrap();

        let reopened = RouteFilterStore::new(Box::new(FileStore::new(&path)));
        assert_eq!(reopened.load(), selection());
        assert_eq!(FileStore::new(&path).get("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn corrupted_file_loads_empty_and_is_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "\u{0}garbage").unwrap();

        let mut store = RouteFilterStore::new(Box::new(FileStore::new(&path)));
        assert!(store.load().is_empty());

        store.save(&selection()).unwrap();
        assert_eq!(store.load(), selection());
    }

    #[test]
    fn non_utf8_file_loads_empty_and_is_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, [0xff, 0xfe, 0x7b]).unwrap();

        let mut store = RouteFilterStore::new(Box::new(FileStore::new(&path)));
        assert!(store.load().is_empty());

        store.save(&RouteSelection::from_route_ids(["57"])).unwrap();
        let reopened = RouteFilterStore::new(Box::new(FileStore::new(&path)));
        assert_eq!(reopened.load().values().collect::<Vec<_>>(), vec!["57"]);
    }
}
