//! I/O abstractions for index storage:
//! - `ReadAt`: positional reader that fetches a byte range from a file or buffer.
//! - `SealingWrite`: sequential writer whose content becomes visible on `seal()`.
//! - `Directory`: a tree of named files addressed by `/`-separated relative paths,
//!   with a file-system and an in-memory implementation.

use std::ops::Range;

pub mod bytes;
pub mod directory;
pub mod file;
pub mod fs_directory;
pub mod memory;
pub mod memory_directory;

pub use bytes::SharedBytes;
pub use directory::{Directory, join_path};
pub use fs_directory::FsDirectory;
pub use memory_directory::MemoryDirectory;

/// A conceptual file or buffer that supports reading from arbitrary positions.
pub trait ReadAt: Send + Sync + 'static {
    /// Returns the size of the underlying object.
    fn size(&self) -> std::io::Result<u64>;

    /// Reads the specified range of bytes.
    ///
    /// Returns fewer bytes than requested only when the range extends past the end
    /// of the object.
    fn read_at(&self, range: Range<u64>) -> std::io::Result<SharedBytes>;

    fn storage_profile(&self) -> StorageProfile;
}

/// Sequential writer with explicit sealing.
///
/// Data written before `seal()` is not guaranteed to be visible to readers.
pub trait SealingWrite: Send {
    /// Appends the entire buffer; either all bytes are written or an error is returned.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Flushes and commits the written content. No writes are accepted afterwards.
    fn seal(&mut self) -> std::io::Result<()>;

    fn storage_profile(&self) -> StorageProfile;
}

/// Characterizes the performance aspects of the underlying storage implementation.
#[derive(Debug, Clone)]
pub struct StorageProfile {
    /// Suggested minimum size for an effective I/O request.
    pub min_io_size: usize,
    /// Suggested maximum size for a single I/O request.
    pub max_io_size: usize,
}

impl StorageProfile {
    /// Clamps `size` into `[min_io_size, max_io_size]`, never returning zero.
    pub fn clamp_io_size(&self, size: usize) -> usize {
        let min = self.min_io_size.max(1).min(self.max_io_size);
        let max = self.max_io_size.max(1).max(min);
        size.clamp(min, max)
    }
}

impl Default for StorageProfile {
    fn default() -> StorageProfile {
        Self {
            min_io_size: 4 * 1024,
            max_io_size: 4 * 1024 * 1024,
        }
    }
}

#[macro_export]
macro_rules! verify {
    ($e:expr) => {
        if !($e) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                concat!("condition violated: ", stringify!($e)),
            ));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::StorageProfile;

    #[test]
    fn test_clamp_io_size() {
        let profile = StorageProfile {
            min_io_size: 100,
            max_io_size: 1000,
        };
        assert_eq!(profile.clamp_io_size(10), 100);
        assert_eq!(profile.clamp_io_size(500), 500);
        assert_eq!(profile.clamp_io_size(5000), 1000);

        let degenerate = StorageProfile {
            min_io_size: 0,
            max_io_size: 0,
        };
        assert_eq!(degenerate.clamp_io_size(0), 1);
    }
}
