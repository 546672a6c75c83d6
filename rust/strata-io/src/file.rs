use std::{
    fs::File,
    io::Write,
    ops::Range,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use crate::{ReadAt, SealingWrite, SharedBytes, StorageProfile, verify};

pub struct FileReader {
    file: Arc<File>,
    size: OnceLock<u64>,
}

impl FileReader {
    pub fn new(file: impl Into<Arc<File>>) -> FileReader {
        FileReader {
            file: file.into(),
            size: Default::default(),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<FileReader> {
        Ok(FileReader::new(File::open(path)?))
    }

    fn get_size(&self) -> std::io::Result<u64> {
        if let Some(&size) = self.size.get() {
            Ok(size)
        } else {
            let size = self.file.metadata()?.len();
            let _ = self.size.set(size);
            Ok(size)
        }
    }
}

impl ReadAt for FileReader {
    fn size(&self) -> std::io::Result<u64> {
        self.get_size()
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<SharedBytes> {
        verify!(range.end >= range.start);
        let size = self.get_size()?;
        if range.start >= size || range.is_empty() {
            return Ok(SharedBytes::new());
        }
        let end = range.end.min(size);
        let mut buf = vec![0u8; (end - range.start) as usize];
        file_read_at_exact(&self.file, range.start, &mut buf)?;
        Ok(buf.into())
    }

    fn storage_profile(&self) -> StorageProfile {
        StorageProfile {
            min_io_size: 16 * 1024,
            max_io_size: 1024 * 1024,
        }
    }
}

/// Writes into a temporary sibling file and renames it over the target on `seal()`,
/// so readers observe either the old content or the complete new content.
pub struct FileWriter {
    file: Option<File>,
    temp_path: PathBuf,
    target_path: PathBuf,
}

impl FileWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<FileWriter> {
        let target_path = path.as_ref().to_path_buf();
        let mut temp_name = target_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        temp_name.push(".tmp");
        let temp_path = target_path.with_file_name(temp_name);
        let file = File::create(&temp_path)?;
        Ok(FileWriter {
            file: Some(file),
            temp_path,
            target_path,
        })
    }
}

impl SealingWrite for FileWriter {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?
            .write_all(buf)
    }

    fn seal(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.temp_path, &self.target_path)
    }

    fn storage_profile(&self) -> StorageProfile {
        Default::default()
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            // Abandoned before sealing: the target keeps its previous content.
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(unix)]
pub fn file_read_at_exact(file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.read_exact_at(buf, pos)
}

#[cfg(windows)]
pub fn file_read_at_exact(file: &File, mut pos: u64, mut buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, pos) {
            Ok(0) => break,
            Ok(n) => {
                buf = &mut buf[n..];
                pos += n as u64;
            }
            Err(e) => return Err(e),
        }
    }
    if !buf.is_empty() {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{FileReader, FileWriter};
    use crate::{ReadAt, SealingWrite};

    #[test]
    fn test_writer_is_invisible_until_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"old").unwrap();

        let mut writer = FileWriter::create(&path).unwrap();
        writer.write_all(b"new content").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        writer.seal().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new content");

        let reader = FileReader::open(&path).unwrap();
        assert_eq!(reader.size().unwrap(), 11);
        assert_eq!(reader.read_at(4..7).unwrap().as_slice(), b"con");
        assert_eq!(reader.read_at(8..64).unwrap().as_slice(), b"ent");
    }

    #[test]
    fn test_abandoned_writer_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.1");
        std::fs::write(&path, b"committed").unwrap();
        {
            let mut writer = FileWriter::create(&path).unwrap();
            writer.write_all(b"partial").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"committed");
        assert!(!dir.path().join("version.1.tmp").exists());
    }
}
