use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use blake3::Hasher;
use chunkflow_mem::error::{Error as MemError, Result as MemResult};
use chunkflow_mem::Storage;

/// Local filesystem storage (rooted at the host filesystem).
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

fn open_err(path: &str, e: std::io::Error) -> MemError {
    if e.kind() == ErrorKind::NotFound {
        MemError::NotFound(path.to_string())
    } else {
        MemError::Storage(format!("open {path}: {e}"))
    }
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| MemError::Storage(format!("mkparent: {e}")))?;
        }
        let mut f = File::create(p).map_err(|e| MemError::Storage(format!("create: {e}")))?;
        f.write_all(bytes)
            .map_err(|e| MemError::Storage(format!("write: {e}")))?;
        f.flush()
            .map_err(|e| MemError::Storage(format!("flush: {e}")))?;
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let mut f = File::open(Path::new(path)).map_err(|e| open_err(path, e))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| MemError::Storage(format!("seek: {e}")))?;
        let mut buf = Vec::with_capacity(len);
        f.take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| MemError::Storage(format!("read: {e}")))?;
        Ok(buf)
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        match fs::remove_file(Path::new(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MemError::Storage(format!("delete: {e}"))),
        }
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let prefix_path = Path::new(prefix);
        let mut results = Vec::new();

        if !prefix_path.exists() {
            return Ok(results);
        }

        if prefix_path.is_file() {
            if let Some(s) = prefix_path.to_str() {
                results.push(s.to_string());
            }
            return Ok(results);
        }

        fn visit_dirs(dir: &Path, results: &mut Vec<String>) -> std::io::Result<()> {
            if dir.is_dir() {
                for entry in fs::read_dir(dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if path.is_dir() {
                        visit_dirs(&path, results)?;
                    } else if let Some(s) = path.to_str() {
                        results.push(s.to_string());
                    }
                }
            }
            Ok(())
        }

        visit_dirs(prefix_path, &mut results)
            .map_err(|e| MemError::Storage(format!("list: {e}")))?;
        results.sort();

        Ok(results)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        let meta = fs::metadata(Path::new(path)).map_err(|e| open_err(path, e))?;
        Ok(meta.len())
    }

    fn etag(&self, path: &str) -> MemResult<Option<String>> {
        // Pseudo-ETag: hash(size || mtime || path)
        let p = Path::new(path);
        match fs::metadata(p) {
            Ok(meta) => {
                let mut h = Hasher::new();
                h.update(&meta.len().to_le_bytes());
                if let Ok(m) = meta.modified() {
                    if let Ok(d) = m.duration_since(std::time::SystemTime::UNIX_EPOCH) {
                        h.update(&d.as_secs().to_le_bytes());
                        h.update(&d.subsec_nanos().to_le_bytes());
                    }
                }
                h.update(path.as_bytes());
                Ok(Some(h.finalize().to_hex().to_string()))
            }
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!(
            "chunkflow-fs-{}-{}",
            name,
            std::process::id()
        ));
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn write_read_delete() {
        let dir = scratch("rw");
        let path = format!("{dir}/nested/seg.bin");
        let s = FsStorage::new();

        s.write(&path, b"hello world").unwrap();
        assert_eq!(s.read_range(&path, 6, 5).unwrap(), b"world");
        assert_eq!(s.read_all(&path).unwrap(), b"hello world");
        assert_eq!(s.list(&dir).unwrap(), vec![path.clone()]);
        assert!(s.etag(&path).unwrap().is_some());

        s.delete(&path).unwrap();
        s.delete(&path).unwrap();
        assert!(matches!(s.size(&path), Err(MemError::NotFound(_))));
        let _ = fs::remove_dir_all(&dir);
    }
}
