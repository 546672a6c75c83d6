use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    Directory, ReadAt, SealingWrite, SharedBytes,
    file::{FileReader, FileWriter},
};

/// [`Directory`] rooted at a local file-system folder.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<FsDirectory> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FsDirectory { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }
}

impl Directory for FsDirectory {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn read_file(&self, path: &str) -> std::io::Result<SharedBytes> {
        Ok(std::fs::read(self.resolve(path))?.into())
    }

    fn open_read(&self, path: &str) -> std::io::Result<Arc<dyn ReadAt>> {
        Ok(Arc::new(FileReader::open(self.resolve(path))?))
    }

    fn file_len(&self, path: &str) -> std::io::Result<u64> {
        Ok(std::fs::metadata(self.resolve(path))?.len())
    }

    fn create_writer(&self, path: &str) -> std::io::Result<Box<dyn SealingWrite>> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(FileWriter::create(full)?))
    }

    fn create_dir_all(&self, path: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.resolve(path))
    }

    fn list(&self, path: &str) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove_file(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }

    fn remove_dir_all(&self, path: &str) -> std::io::Result<()> {
        match std::fs::remove_dir_all(self.resolve(path)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            res => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FsDirectory;
    use crate::Directory;

    #[test]
    fn test_fs_directory_basic_ops() {
        let temp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::new(temp.path().join("partition")).unwrap();

        dir.write_file("segment_0/attribute/price/data", b"\x01\x02")
            .unwrap();
        dir.write_file("version.0", b"{}").unwrap();
        assert!(dir.exists("segment_0/attribute/price"));
        assert!(dir.is_dir("segment_0"));
        assert!(!dir.is_dir("version.0"));
        assert_eq!(dir.file_len("segment_0/attribute/price/data").unwrap(), 2);
        assert_eq!(dir.list("").unwrap(), vec!["segment_0", "version.0"]);

        let reader = dir.open_read("segment_0/attribute/price/data").unwrap();
        assert_eq!(reader.read_at(1..2).unwrap().as_slice(), &[2]);

        dir.remove_dir_all("segment_0").unwrap();
        assert!(!dir.exists("segment_0"));
        dir.remove_dir_all("segment_0").unwrap();
    }
}
