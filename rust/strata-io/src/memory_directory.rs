use std::{collections::BTreeMap, sync::Arc, sync::RwLock};

use ahash::AHashSet;

use crate::{Directory, ReadAt, SealingWrite, SharedBytes, StorageProfile};

/// In-memory [`Directory`].
///
/// Supports injecting write failures for paths containing a given fragment, which lets
/// callers exercise their failure paths without a real device.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    files: RwLock<BTreeMap<String, SharedBytes>>,
    dirs: RwLock<AHashSet<String>>,
    fail_writes: RwLock<Option<String>>,
}

impl MemoryDirectory {
    pub fn new() -> MemoryDirectory {
        Default::default()
    }

    /// Every subsequent seal of a path containing `fragment` fails until cleared with `None`.
    pub fn inject_write_failure(&self, fragment: Option<&str>) {
        *self.inner.fail_writes.write().expect("write lock") = fragment.map(str::to_string);
    }

    pub fn file_count(&self) -> usize {
        self.inner.files.read().expect("read lock").len()
    }

    fn not_found(path: &str) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string())
    }

    fn dir_prefix(path: &str) -> String {
        if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        }
    }

    fn register_parents(&self, path: &str) {
        let mut dirs = self.inner.dirs.write().expect("write lock");
        let mut current = path;
        while let Some(pos) = current.rfind('/') {
            current = &current[..pos];
            dirs.insert(current.to_string());
        }
    }
}

impl Directory for MemoryDirectory {
    fn exists(&self, path: &str) -> bool {
        self.inner.files.read().expect("read lock").contains_key(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.inner.dirs.read().expect("read lock").contains(path)
    }

    fn read_file(&self, path: &str) -> std::io::Result<SharedBytes> {
        self.inner
            .files
            .read()
            .expect("read lock")
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    fn open_read(&self, path: &str) -> std::io::Result<Arc<dyn ReadAt>> {
        Ok(Arc::new(self.read_file(path)?))
    }

    fn file_len(&self, path: &str) -> std::io::Result<u64> {
        Ok(self.read_file(path)?.len() as u64)
    }

    fn create_writer(&self, path: &str) -> std::io::Result<Box<dyn SealingWrite>> {
        Ok(Box::new(MemoryFileWriter {
            dir: self.clone(),
            path: path.to_string(),
            buf: Some(Vec::new()),
        }))
    }

    fn create_dir_all(&self, path: &str) -> std::io::Result<()> {
        if !path.is_empty() {
            self.register_parents(&format!("{path}/_"));
        }
        Ok(())
    }

    fn list(&self, path: &str) -> std::io::Result<Vec<String>> {
        if !self.is_dir(path) {
            return Err(Self::not_found(path));
        }
        let prefix = Self::dir_prefix(path);
        let mut names = AHashSet::new();
        for key in self.inner.files.read().expect("read lock").keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                names.insert(rest.split('/').next().unwrap_or(rest).to_string());
            }
        }
        for dir in self.inner.dirs.read().expect("read lock").iter() {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() {
                    names.insert(rest.split('/').next().unwrap_or(rest).to_string());
                }
            }
        }
        let mut names = names.into_iter().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn remove_file(&self, path: &str) -> std::io::Result<()> {
        self.inner
            .files
            .write()
            .expect("write lock")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    fn remove_dir_all(&self, path: &str) -> std::io::Result<()> {
        let prefix = Self::dir_prefix(path);
        self.inner
            .files
            .write()
            .expect("write lock")
            .retain(|k, _| !k.starts_with(&prefix) && k != path);
        self.inner
            .dirs
            .write()
            .expect("write lock")
            .retain(|d| !d.starts_with(&prefix) && d != path);
        Ok(())
    }
}

struct MemoryFileWriter {
    dir: MemoryDirectory,
    path: String,
    buf: Option<Vec<u8>>,
}

impl SealingWrite for MemoryFileWriter {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?
            .extend_from_slice(buf);
        Ok(())
    }

    fn seal(&mut self) -> std::io::Result<()> {
        let buf = self
            .buf
            .take()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
        if let Some(fragment) = self.dir.inner.fail_writes.read().expect("read lock").as_ref() {
            if self.path.contains(fragment.as_str()) {
                log::debug!("injected write failure for {}", self.path);
                return Err(std::io::Error::other(format!(
                    "injected write failure: {}",
                    self.path
                )));
            }
        }
        self.dir.register_parents(&self.path);
        self.dir
            .inner
            .files
            .write()
            .expect("write lock")
            .insert(self.path.clone(), buf.into());
        Ok(())
    }

    fn storage_profile(&self) -> StorageProfile {
        Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryDirectory;
    use crate::Directory;

    #[test]
    fn test_list_and_remove() {
        let dir = MemoryDirectory::new();
        dir.write_file("segment_1/attribute/a/data", b"x").unwrap();
        dir.write_file("segment_1/segment_info", b"{}").unwrap();
        dir.write_file("version.3", b"{}").unwrap();
        dir.create_dir_all("segment_2/attribute").unwrap();

        assert_eq!(
            dir.list("").unwrap(),
            vec!["segment_1", "segment_2", "version.3"]
        );
        assert_eq!(
            dir.list("segment_1").unwrap(),
            vec!["attribute", "segment_info"]
        );
        assert!(dir.is_dir("segment_2/attribute"));
        assert!(dir.list("missing").is_err());

        dir.remove_dir_all("segment_1").unwrap();
        assert!(!dir.exists("segment_1/segment_info"));
        assert_eq!(dir.list("").unwrap(), vec!["segment_2", "version.3"]);
    }

    #[test]
    fn test_unsealed_writer_is_invisible() {
        let dir = MemoryDirectory::new();
        let mut writer = dir.create_writer("patch").unwrap();
        writer.write_all(b"abc").unwrap();
        assert!(!dir.exists("patch"));
        writer.seal().unwrap();
        assert_eq!(dir.read_file("patch").unwrap().as_slice(), b"abc");
    }

    #[test]
    fn test_injected_failure() {
        let dir = MemoryDirectory::new();
        dir.write_file("version.0", b"v0").unwrap();
        dir.inject_write_failure(Some("version."));
        assert!(dir.write_file("version.1", b"v1").is_err());
        assert!(!dir.exists("version.1"));
        dir.inject_write_failure(None);
        dir.write_file("version.1", b"v1").unwrap();
        assert_eq!(dir.read_file("version.0").unwrap().as_slice(), b"v0");
    }
}
