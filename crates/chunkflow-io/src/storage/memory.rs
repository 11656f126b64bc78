//! In-memory storage backend.
//!
//! Provides a HashMap-based storage that implements the Storage trait.
//! Used for the `memory://` spill scheme and in tests to avoid file I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chunkflow_mem::error::{Error as MemError, Result as MemResult};
use chunkflow_mem::Storage;

/// Thread-safe in-memory storage using a HashMap.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MemResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| MemError::Storage("memory storage lock poisoned".into()))
    }

    /// Check if a path exists
    pub fn contains(&self, path: &str) -> bool {
        self.lock().map(|d| d.contains_key(path)).unwrap_or(false)
    }

    /// Get the number of stored objects
    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        self.lock()?.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let data = self.lock()?;
        let bytes = data
            .get(path)
            .ok_or_else(|| MemError::NotFound(path.to_string()))?;

        let start = offset as usize;
        if start > bytes.len() {
            return Err(MemError::Storage(format!(
                "offset {} exceeds size {}",
                offset,
                bytes.len()
            )));
        }
        let end = start.saturating_add(len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        self.lock()?.remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let mut result: Vec<String> = self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        self.lock()?
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| MemError::NotFound(path.to_string()))
    }

    fn etag(&self, path: &str) -> MemResult<Option<String>> {
        Ok(self
            .lock()?
            .get(path)
            .map(|b| blake3::hash(b).to_hex().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_read_range() {
        let storage = MemoryStorage::new();
        let path = "test/file.txt";
        storage.write(path, b"hello world").unwrap();

        assert_eq!(storage.read_range(path, 6, 5).unwrap(), b"world");
        assert_eq!(storage.read_range(path, 6, 100).unwrap(), b"world");
        assert_eq!(storage.read_all(path).unwrap(), b"hello world");
    }

    #[test]
    fn test_memory_storage_delete() {
        let storage = MemoryStorage::new();
        let path = "test/file.txt";

        storage.write(path, b"data").unwrap();
        assert!(storage.contains(path));

        storage.delete(path).unwrap();
        assert!(!storage.contains(path));
        assert!(matches!(storage.size(path), Err(MemError::NotFound(_))));
    }

    #[test]
    fn test_memory_storage_list() {
        let storage = MemoryStorage::new();

        storage.write("dir/file1.txt", b"1").unwrap();
        storage.write("dir/file2.txt", b"2").unwrap();
        storage.write("other/file3.txt", b"3").unwrap();

        let files = storage.list("dir/").unwrap();
        assert_eq!(files, vec!["dir/file1.txt", "dir/file2.txt"]);
        assert_eq!(storage.len(), 3);
    }
}
