use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::PointerStoreError;
use crate::schema::{DurablePointer, PersistedRecord, PointerFile, POINTER_FILE_VERSION};

/// Typed repository of durable run pointers.
///
/// Each call is a complete read-modify-write; callers never hold the table.
pub trait PointerStore: Send + Sync {
    fn list(&self) -> Result<Vec<DurablePointer>, PointerStoreError>;

    /// Insert the pointer, replacing any entry with the same run id.
    fn upsert(&self, pointer: DurablePointer) -> Result<(), PointerStoreError>;

    /// Returns whether an entry was removed.
    fn remove(&self, run_id: &str) -> Result<bool, PointerStoreError>;
}

/// Pointer table persisted as one JSON document.
///
/// Writes go to a sibling temp file and are renamed into place, so a reader
/// never observes a half-written table.
#[derive(Debug)]
pub struct JsonFilePointerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFilePointerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<Vec<DurablePointer>, PointerStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PointerStoreError::io(
                    "reading pointer file",
                    &self.path,
                    source,
                ))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let record = serde_json::from_str::<PersistedRecord>(&raw)
            .map_err(|source| PointerStoreError::json_parse(&self.path, source))?;
        let found = record.version();
        if found != POINTER_FILE_VERSION {
            return Err(PointerStoreError::UnsupportedVersion {
                path: self.path.clone(),
                found,
            });
        }

        Ok(record.into_pointers())
    }

    fn write_table(&self, pointers: Vec<DurablePointer>) -> Result<(), PointerStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| {
                    PointerStoreError::io("creating pointer directory", parent, source)
                })?;
            }
        }

        let serialized = serde_json::to_vec_pretty(&PointerFile::v1(pointers))
            .map_err(|source| PointerStoreError::json_serialize(&self.path, source))?;

        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, serialized).map_err(|source| {
            PointerStoreError::io("writing pointer temp file", &temp_path, source)
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| {
            PointerStoreError::io("replacing pointer file", &self.path, source)
        })
    }
}

impl PointerStore for JsonFilePointerStore {
    fn list(&self) -> Result<Vec<DurablePointer>, PointerStoreError> {
        let _guard = lock_unpoisoned(&self.lock);
        self.read_table()
    }

    fn upsert(&self, pointer: DurablePointer) -> Result<(), PointerStoreError> {
        let _guard = lock_unpoisoned(&self.lock);
        let mut pointers = self.read_table()?;
        upsert_into(&mut pointers, pointer);
        self.write_table(pointers)
    }

    fn remove(&self, run_id: &str) -> Result<bool, PointerStoreError> {
        let _guard = lock_unpoisoned(&self.lock);
        let mut pointers = self.read_table()?;
        let before = pointers.len();
        pointers.retain(|pointer| pointer.run_id != run_id);
        if pointers.len() == before {
            return Ok(false);
        }
        self.write_table(pointers)?;
        Ok(true)
    }
}

/// Process-local store for tests and hosts without a writable home.
#[derive(Debug, Default)]
pub struct MemoryPointerStore {
    pointers: Mutex<Vec<DurablePointer>>,
}

impl MemoryPointerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pointers(pointers: Vec<DurablePointer>) -> Self {
        Self {
            pointers: Mutex::new(pointers),
        }
    }
}

impl PointerStore for MemoryPointerStore {
    fn list(&self) -> Result<Vec<DurablePointer>, PointerStoreError> {
        Ok(lock_unpoisoned(&self.pointers)
            .iter()
            .filter(|pointer| pointer.is_usable())
            .cloned()
            .collect())
    }

    fn upsert(&self, pointer: DurablePointer) -> Result<(), PointerStoreError> {
        upsert_into(&mut lock_unpoisoned(&self.pointers), pointer);
        Ok(())
    }

    fn remove(&self, run_id: &str) -> Result<bool, PointerStoreError> {
        let mut pointers = lock_unpoisoned(&self.pointers);
        let before = pointers.len();
        pointers.retain(|pointer| pointer.run_id != run_id);
        Ok(pointers.len() != before)
    }
}

fn upsert_into(pointers: &mut Vec<DurablePointer>, pointer: DurablePointer) {
    match pointers
        .iter_mut()
        .find(|existing| existing.run_id == pointer.run_id)
    {
        Some(existing) => *existing = pointer,
        None => pointers.push(pointer),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_entry_with_same_run_id() {
        let mut pointers = vec![DurablePointer::new("r1", "s1", 1)];
        upsert_into(&mut pointers, DurablePointer::new("r1", "s1", 2));
        upsert_into(&mut pointers, DurablePointer::new("r2", "s2", 3));
        assert_eq!(
            pointers,
            vec![
                DurablePointer::new("r1", "s1", 2),
                DurablePointer::new("r2", "s2", 3)
            ]
        );
    }

    #[test]
    fn temp_path_is_a_sibling() {
        assert_eq!(
            temp_path_for(Path::new("/tmp/x/active_streams.json")),
            PathBuf::from("/tmp/x/active_streams.json.tmp")
        );
    }

    #[test]
    fn memory_store_reports_whether_remove_matched() {
        let store = MemoryPointerStore::with_pointers(vec![DurablePointer::new("r1", "s1", 0)]);
        assert!(store.remove("r1").expect("remove"));
        assert!(!store.remove("r1").expect("remove again"));
        assert!(store.list().expect("list").is_empty());
    }
}
