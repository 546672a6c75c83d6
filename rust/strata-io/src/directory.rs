use std::sync::Arc;

use crate::{ReadAt, SealingWrite, SharedBytes};

/// A tree of files addressed by relative `/`-separated paths.
///
/// Paths never start with `/`. The empty path denotes the directory root.
pub trait Directory: Send + Sync + 'static {
    /// Returns `true` if a file or a directory exists at `path`.
    fn exists(&self, path: &str) -> bool;

    fn is_dir(&self, path: &str) -> bool;

    fn read_file(&self, path: &str) -> std::io::Result<SharedBytes>;

    fn open_read(&self, path: &str) -> std::io::Result<Arc<dyn ReadAt>>;

    fn file_len(&self, path: &str) -> std::io::Result<u64>;

    /// Creates a writer whose content replaces the file at `path` only when sealed.
    /// Parent directories are created as needed.
    fn create_writer(&self, path: &str) -> std::io::Result<Box<dyn SealingWrite>>;

    /// Atomically replaces the content of the file at `path`.
    fn write_file(&self, path: &str, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.create_writer(path)?;
        writer.write_all(data)?;
        writer.seal()
    }

    fn create_dir_all(&self, path: &str) -> std::io::Result<()>;

    /// Returns the names of the immediate children of `path`, sorted.
    fn list(&self, path: &str) -> std::io::Result<Vec<String>>;

    fn remove_file(&self, path: &str) -> std::io::Result<()>;

    /// Removes a directory with everything under it. Removing a missing path succeeds.
    fn remove_dir_all(&self, path: &str) -> std::io::Result<()>;
}

pub fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}
