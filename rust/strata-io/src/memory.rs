use std::ops::Range;

use crate::{ReadAt, SealingWrite, SharedBytes, StorageProfile};

impl ReadAt for SharedBytes {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<SharedBytes> {
        crate::verify!(range.end >= range.start);
        let len = self.len() as u64;
        if range.start >= len {
            return Ok(SharedBytes::new());
        }
        let end = range.end.min(len);
        Ok(self.slice(range.start as usize..end as usize))
    }

    fn storage_profile(&self) -> StorageProfile {
        StorageProfile {
            min_io_size: 1,
            max_io_size: 1 << 30,
        }
    }
}

impl SealingWrite for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }

    fn seal(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn storage_profile(&self) -> StorageProfile {
        Default::default()
    }
}
